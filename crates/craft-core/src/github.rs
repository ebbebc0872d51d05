//! GitHub-backed `CiClient`/`StatusClient` (§4.1/§4.2): the reference CI and
//! status provider both talk to the GitHub REST API v3, authenticated with a
//! personal access token resolved the same way the rest of the workspace
//! resolves credentials.

use std::time::Duration;

use chrono::{DateTime, Utc};
use craft_types::CraftError;
use serde::Deserialize;

use crate::artifact_provider::{CiArtifactListing, CiClient, CiWorkflowRun};
use crate::status_provider::{CheckConclusion, CheckRun, CheckRunStatus, CombinedStatus, LegacyState, LegacyStatus, StatusClient};

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

pub struct GithubClient {
    http: reqwest::blocking::Client,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("craft")
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
            owner: owner.into(),
            repo: repo.into(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::blocking::RequestBuilder {
        let url = format!("{API_BASE}{path}");
        let mut req = self.http.request(method, url).header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, CraftError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CraftError::transient(format!("GET {path} returned {}", response.status())));
        }
        response.json::<T>().map_err(|e| CraftError::transient(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GhArtifactsPage {
    artifacts: Vec<GhArtifact>,
}

#[derive(Debug, Deserialize)]
struct GhArtifact {
    id: u64,
    name: String,
    size_in_bytes: u64,
    created_at: DateTime<Utc>,
    #[serde(default = "default_mime")]
    mime_type: String,
}

fn default_mime() -> String {
    "application/zip".to_string()
}

#[derive(Debug, Deserialize)]
struct GhRunsPage {
    workflow_runs: Vec<GhRun>,
}

#[derive(Debug, Deserialize)]
struct GhRun {
    id: u64,
    name: Option<String>,
    head_sha: String,
}

#[derive(Debug, Deserialize)]
struct GhCommit {
    commit: GhCommitInner,
}

#[derive(Debug, Deserialize)]
struct GhCommitInner {
    committer: GhCommitCommitter,
}

#[derive(Debug, Deserialize)]
struct GhCommitCommitter {
    date: DateTime<Utc>,
}

impl CiClient for GithubClient {
    fn list_recent_artifacts(&self, page: u32) -> Result<Vec<CiArtifactListing>, CraftError> {
        let path = format!("/repos/{}/{}/actions/artifacts?per_page={PER_PAGE}&page={page}", self.owner, self.repo);
        let parsed: GhArtifactsPage = self.get_json(&path)?;
        Ok(parsed
            .artifacts
            .into_iter()
            .map(|a| CiArtifactListing { id: a.id, name: a.name, mime_type: a.mime_type, size: a.size_in_bytes, created_at: a.created_at })
            .collect())
    }

    fn list_workflow_runs(&self, head_sha: &str, page: u32) -> Result<Vec<CiWorkflowRun>, CraftError> {
        let path = format!(
            "/repos/{}/{}/actions/runs?head_sha={head_sha}&per_page={PER_PAGE}&page={page}",
            self.owner, self.repo
        );
        let parsed: GhRunsPage = self.get_json(&path)?;
        Ok(parsed
            .workflow_runs
            .into_iter()
            .map(|r| CiWorkflowRun { id: r.id, name: r.name.unwrap_or_default(), head_sha: r.head_sha })
            .collect())
    }

    fn list_run_artifacts(&self, run_id: u64) -> Result<Vec<CiArtifactListing>, CraftError> {
        let path = format!("/repos/{}/{}/actions/runs/{run_id}/artifacts?per_page={PER_PAGE}", self.owner, self.repo);
        let parsed: GhArtifactsPage = self.get_json(&path)?;
        Ok(parsed
            .artifacts
            .into_iter()
            .map(|a| CiArtifactListing { id: a.id, name: a.name, mime_type: a.mime_type, size: a.size_in_bytes, created_at: a.created_at })
            .collect())
    }

    fn commit_timestamp(&self, revision: &craft_types::Revision) -> Result<DateTime<Utc>, CraftError> {
        let path = format!("/repos/{}/{}/commits/{}", self.owner, self.repo, revision.as_str());
        let parsed: GhCommit = self.get_json(&path)?;
        Ok(parsed.commit.committer.date)
    }

    fn download(&self, artifact_id: u64) -> Result<Vec<u8>, CraftError> {
        let path = format!("/repos/{}/{}/actions/artifacts/{artifact_id}/zip", self.owner, self.repo);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CraftError::transient(format!("artifact download {artifact_id} returned {}", response.status())));
        }
        response.bytes().map(|b| b.to_vec()).map_err(|e| CraftError::transient(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GhLegacyStatus {
    state: String,
    context: String,
    target_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhCombinedLegacy {
    statuses: Vec<GhLegacyStatus>,
}

#[derive(Debug, Deserialize)]
struct GhCheckSuitesPage {
    check_suites: Vec<GhCheckSuite>,
}

#[derive(Debug, Deserialize)]
struct GhCheckSuite {
    status: String,
}

#[derive(Debug, Deserialize)]
struct GhCheckRunsPage {
    check_runs: Vec<GhCheckRunEntry>,
}

#[derive(Debug, Deserialize)]
struct GhCheckRunEntry {
    name: String,
    status: String,
    conclusion: Option<String>,
    html_url: Option<String>,
}

fn legacy_state(raw: &str) -> LegacyState {
    match raw {
        "success" => LegacyState::Success,
        "pending" => LegacyState::Pending,
        "error" => LegacyState::Error,
        _ => LegacyState::Failure,
    }
}

fn check_run_status(raw: &str) -> CheckRunStatus {
    match raw {
        "queued" => CheckRunStatus::Queued,
        "in_progress" => CheckRunStatus::InProgress,
        _ => CheckRunStatus::Completed,
    }
}

fn check_conclusion(raw: &str) -> CheckConclusion {
    match raw {
        "success" => CheckConclusion::Success,
        "skipped" | "neutral" => CheckConclusion::Skipped,
        "cancelled" => CheckConclusion::Cancelled,
        "timed_out" => CheckConclusion::TimedOut,
        "action_required" => CheckConclusion::ActionRequired,
        _ => CheckConclusion::Failure,
    }
}

impl StatusClient for GithubClient {
    fn fetch(&self, revision: &craft_types::Revision) -> Result<CombinedStatus, CraftError> {
        let legacy_path = format!("/repos/{}/{}/commits/{}/status", self.owner, self.repo, revision.as_str());
        let legacy: GhCombinedLegacy = self.get_json(&legacy_path)?;

        let suites_path = format!("/repos/{}/{}/commits/{}/check-suites", self.owner, self.repo, revision.as_str());
        let suites: GhCheckSuitesPage = self.get_json(&suites_path)?;
        let check_suites_pending = suites.check_suites.iter().any(|s| s.status != "completed");

        let runs_path = format!("/repos/{}/{}/commits/{}/check-runs?per_page={PER_PAGE}", self.owner, self.repo, revision.as_str());
        let runs: GhCheckRunsPage = self.get_json(&runs_path)?;

        Ok(CombinedStatus {
            legacy: legacy
                .statuses
                .into_iter()
                .map(|s| LegacyStatus { context: s.context, state: legacy_state(&s.state), target_url: s.target_url })
                .collect(),
            check_suites_pending,
            check_runs: runs
                .check_runs
                .into_iter()
                .map(|r| CheckRun {
                    name: r.name,
                    status: check_run_status(&r.status),
                    conclusion: r.conclusion.as_deref().map(check_conclusion),
                    html_url: r.html_url,
                })
                .collect(),
        })
    }
}
