//! Sonatype staging-repository lifecycle (§4.6): a process-wide singleton
//! resource backed by the legacy Nexus staging API and the newer Central
//! publisher status API. Acquisition requires exactly one active repository;
//! close and release each poll to a terminal state under a 2-hour deadline.

use std::time::{Duration, Instant};

use craft_types::{CraftError, NexusRepository, NexusRepositoryState};
use serde::Deserialize;

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEADLINE: Duration = Duration::from_secs(2 * 60 * 60);

/// Central publisher `deploymentState` values observed while polling a
/// release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Validated,
    Publishing,
    Published,
    Failed,
}

impl DeploymentState {
    fn is_pending(self) -> bool {
        matches!(self, DeploymentState::Validated | DeploymentState::Publishing)
    }
}

/// The two external systems this target drives, abstracted so tests can
/// supply an in-memory fake instead of real HTTP calls.
pub trait SonatypeClient: Send + Sync {
    /// `GET /manual/search/repositories`. Returns every active repository;
    /// the caller enforces the "exactly one" invariant.
    fn search_repositories(&self) -> Result<Vec<NexusRepository>, CraftError>;

    /// `POST /service/local/staging/bulk/close`.
    fn close_repository(&self, id: &str) -> Result<(), CraftError>;

    /// `POST /service/local/staging/bulk/promote`.
    fn promote_repository(&self, id: &str) -> Result<(), CraftError>;

    /// `POST /publisher/status?id=<deploymentId>`.
    fn deployment_status(&self, deployment_id: &str) -> Result<DeploymentState, CraftError>;

    /// Injectable sleep so tests don't block on real wall-clock polling.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct StagingRepository<'a> {
    client: &'a dyn SonatypeClient,
}

impl<'a> StagingRepository<'a> {
    pub fn new(client: &'a dyn SonatypeClient) -> Self {
        Self { client }
    }

    /// Acquire the sole active staging repository. Fails fast — no retry —
    /// if zero or more than one repository is active.
    pub fn get_repository(&self) -> Result<NexusRepository, CraftError> {
        let mut repos = self.client.search_repositories()?;
        match repos.len() {
            0 => Err(CraftError::precondition_failed("No available repositories")),
            1 => Ok(repos.remove(0)),
            _ => Err(CraftError::precondition_failed("There are more than 1 active repositories")),
        }
    }

    /// Close the repository and poll until `state == closed`, bounded by the
    /// 2-hour deadline.
    pub fn close_repository(&self, id: &str) -> Result<(), CraftError> {
        self.client.close_repository(id)?;
        let deadline = Instant::now() + DEADLINE;
        loop {
            let repos = self.client.search_repositories()?;
            if let Some(repo) = repos.iter().find(|r| r.repository_id == id) {
                if repo.state == NexusRepositoryState::Closed {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(CraftError::deadline("Deadline for Nexus repository status change reached"));
            }
            self.client.sleep(POLL_INTERVAL);
        }
    }

    /// Promote the repository and poll the Central publisher's deployment
    /// status until `PUBLISHED`, bounded by the same deadline.
    pub fn release_repository(&self, id: &str, deployment_id: &str) -> Result<(), CraftError> {
        self.client.promote_repository(id)?;
        let deadline = Instant::now() + DEADLINE;
        loop {
            let state = self.client.deployment_status(deployment_id)?;
            match state {
                DeploymentState::Published => return Ok(()),
                DeploymentState::Failed => {
                    return Err(CraftError::precondition_failed("Central publisher reported a failed deployment"));
                }
                _ if state.is_pending() => {}
                _ => return Err(CraftError::precondition_failed(format!("unexpected terminal deployment state: {state:?}"))),
            }
            if Instant::now() >= deadline {
                return Err(CraftError::deadline("Deadline for Central publisher deployment status reached"));
            }
            self.client.sleep(POLL_INTERVAL);
        }
    }

    /// `closeAndReleaseRepository`: precondition the repository is `open`;
    /// if `close_repository` fails, `release_repository` is never attempted.
    pub fn close_and_release_repository(&self, repo: &NexusRepository) -> Result<(), CraftError> {
        if repo.state != NexusRepositoryState::Open {
            return Err(CraftError::precondition_failed(format!(
                "staging repository {} is not open (state: {:?})",
                repo.repository_id, repo.state
            )));
        }
        self.close_repository(&repo.repository_id)?;
        self.release_repository(&repo.repository_id, &repo.deployment_id)
    }
}
