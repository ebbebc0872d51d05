//! Concrete `SonatypeClient`/`MavenClient` wiring (§4.6): the Nexus staging
//! API and Central publisher status API over HTTP, and `gpg:sign-and-deploy-file`
//! shelled out through `craft_process`.

use std::time::Duration;

use craft_types::{CraftError, NexusRepository, NexusRepositoryState};
use serde::Deserialize;

use super::staging::{DeploymentState, SonatypeClient};
use super::{MavenClient, SignAndDeployRequest};

pub struct HttpSonatypeClient {
    http: reqwest::blocking::Client,
    server_url: String,
    username: String,
    password: String,
}

impl HttpSonatypeClient {
    pub fn new(server_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    repositories: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    key: String,
    state: String,
    portal_deployment_id: String,
}

#[derive(Debug, Deserialize)]
struct PublisherStatusResponse {
    #[serde(rename = "deploymentState")]
    deployment_state: DeploymentState,
}

impl SonatypeClient for HttpSonatypeClient {
    fn search_repositories(&self) -> Result<Vec<NexusRepository>, CraftError> {
        let url = format!("{}/manual/search/repositories", self.server_url);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CraftError::transient(format!("search_repositories returned {}", response.status())));
        }
        let parsed: SearchResponse = response.json().map_err(|e| CraftError::transient(e.to_string()))?;
        parsed
            .repositories
            .into_iter()
            .map(|e| {
                let state = match e.state.as_str() {
                    "open" => NexusRepositoryState::Open,
                    "closed" => NexusRepositoryState::Closed,
                    "released" => NexusRepositoryState::Released,
                    other => return Err(CraftError::transient(format!("unexpected repository state {other:?} from {url}"))),
                };
                Ok(NexusRepository { repository_id: e.key, state, deployment_id: e.portal_deployment_id })
            })
            .collect()
    }

    fn close_repository(&self, id: &str) -> Result<(), CraftError> {
        let url = format!("{}/service/local/staging/bulk/close", self.server_url);
        let body = serde_json::json!({"data": {"stagedRepositoryIds": [id], "description": "craft release"}});
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CraftError::transient(format!("close_repository returned {}", response.status())));
        }
        Ok(())
    }

    fn promote_repository(&self, id: &str) -> Result<(), CraftError> {
        let url = format!("{}/service/local/staging/bulk/promote", self.server_url);
        let body = serde_json::json!({"data": {"stagedRepositoryIds": [id], "description": "craft release"}});
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CraftError::transient(format!("promote_repository returned {}", response.status())));
        }
        Ok(())
    }

    fn deployment_status(&self, deployment_id: &str) -> Result<DeploymentState, CraftError> {
        let url = format!("{}/api/v1/publisher/status?id={deployment_id}", self.server_url);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CraftError::transient(format!("deployment_status returned {}", response.status())));
        }
        let parsed: PublisherStatusResponse = response.json().map_err(|e| CraftError::transient(e.to_string()))?;
        Ok(parsed.deployment_state)
    }
}

impl MavenClient for HttpSonatypeClient {
    fn is_already_published(&self, package_name: &str, version: &str) -> Result<bool, CraftError> {
        let url = format!(
            "{}/api/v1/publisher/published?namespace={}&name={package_name}&version={version}",
            self.server_url,
            self.username
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(|e| CraftError::transient(e.to_string()))?;
        // Central reports 404 for "not published yet" rather than a body flag.
        Ok(response.status().is_success())
    }

    fn sign_and_deploy(&self, request: &SignAndDeployRequest) -> Result<(), CraftError> {
        let mut args: Vec<String> = vec![
            "gpg:sign-and-deploy-file".to_string(),
            format!("-Dgpg.keyname={}", gpg_keyname()),
            format!("-Dfile={}", request.primary.unwrap_or(request.pom).display()),
            format!("-DpomFile={}", request.pom.display()),
            format!("-Durl={}", request.url),
            format!("-DrepositoryId={}", request.repository_id),
        ];
        if !request.files.is_empty() {
            let files: Vec<String> = request.files.iter().map(|p| p.display().to_string()).collect();
            args.push(format!("-Dfiles={}", files.join(",")));
            args.push(format!("-Dclassifiers={}", request.classifiers.join(",")));
            args.push(format!("-Dtypes={}", request.types.join(",")));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = craft_process::run_command("mvn", &arg_refs).map_err(|e| CraftError::transient(e.to_string()))?;
        if !result.success {
            return Err(CraftError::transient(format!("mvn gpg:sign-and-deploy-file failed: {}", result.stderr)));
        }
        Ok(())
    }
}

fn gpg_keyname() -> String {
    std::env::var("GPG_KEY_ID").unwrap_or_default()
}
