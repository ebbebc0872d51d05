//! Aggregated pass/pending/fail verdict for a revision, merging a legacy
//! commit-status API with a checks API (§4.2).

use std::collections::HashMap;
use std::sync::Mutex;

use craft_types::{CraftError, Revision, RevisionStatus};

/// One legacy commit-status entry.
#[derive(Debug, Clone)]
pub struct LegacyStatus {
    pub context: String,
    pub state: LegacyState,
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyState {
    Success,
    Pending,
    Failure,
    Error,
}

/// One check-run entry (the newer checks API).
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckConclusion>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckConclusion {
    Success,
    Failure,
    Skipped,
    Cancelled,
    TimedOut,
    ActionRequired,
    Neutral,
}

/// Aggregated bundle fetched once per revision: combined legacy statuses,
/// whether any check suite is still pending, and the check-run list.
#[derive(Debug, Clone, Default)]
pub struct CombinedStatus {
    pub legacy: Vec<LegacyStatus>,
    pub check_suites_pending: bool,
    pub check_runs: Vec<CheckRun>,
}

/// Network access the status provider needs. A real implementation issues
/// the three API calls concurrently; this trait just exposes the end
/// result so the combination algorithm below is independently testable.
pub trait StatusClient: Send + Sync {
    fn fetch(&self, revision: &Revision) -> Result<CombinedStatus, CraftError>;
}

pub trait StatusProvider {
    fn get_revision_status(&self, revision: &Revision) -> Result<RevisionStatus, CraftError>;
    fn get_failure_details(&self, revision: &Revision) -> Result<Vec<String>, CraftError>;
}

/// CI-backed status provider. Caches the combined fetch per revision so a
/// `get_failure_details` call after `get_revision_status` doesn't re-hit the
/// network.
pub struct CiStatusProvider<C: StatusClient> {
    client: C,
    contexts: Vec<String>,
    host: String,
    owner: String,
    repo: String,
    cache: Mutex<HashMap<String, CombinedStatus>>,
}

impl<C: StatusClient> CiStatusProvider<C> {
    pub fn new(client: C, contexts: Vec<String>, host: String, owner: String, repo: String) -> Self {
        Self {
            client,
            contexts,
            host,
            owner,
            repo,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn combined(&self, revision: &Revision) -> Result<CombinedStatus, CraftError> {
        {
            let cache = self.cache.lock().expect("status cache poisoned");
            if let Some(status) = cache.get(revision.as_str()) {
                return Ok(status.clone());
            }
        }
        let fetched = self.client.fetch(revision)?;
        self.cache
            .lock()
            .expect("status cache poisoned")
            .insert(revision.as_str().to_string(), fetched.clone());
        Ok(fetched)
    }

    fn status_by_named_contexts(&self, combined: &CombinedStatus) -> RevisionStatus {
        let mut verdict = RevisionStatus::Success;
        for context in &self.contexts {
            let legacy_hit = combined.legacy.iter().find(|s| &s.context == context);
            let run_hit = combined.check_runs.iter().find(|r| &r.name == context);

            let context_status = match (legacy_hit, run_hit) {
                (None, None) => RevisionStatus::NotFound,
                _ => {
                    let legacy_failed = legacy_hit
                        .is_some_and(|s| matches!(s.state, LegacyState::Failure | LegacyState::Error));
                    let run_failed = run_hit.is_some_and(|r| {
                        r.status == CheckRunStatus::Completed
                            && !matches!(r.conclusion, Some(CheckConclusion::Success) | Some(CheckConclusion::Skipped))
                    });
                    if legacy_failed || run_failed {
                        RevisionStatus::Failure
                    } else {
                        let legacy_pending = legacy_hit.is_some_and(|s| s.state == LegacyState::Pending);
                        let run_pending = run_hit.is_some_and(|r| r.status != CheckRunStatus::Completed);
                        if legacy_pending || run_pending {
                            RevisionStatus::Pending
                        } else {
                            RevisionStatus::Success
                        }
                    }
                }
            };

            if context_status == RevisionStatus::Failure {
                return RevisionStatus::Failure;
            }
            verdict = verdict.combine(context_status);
        }
        verdict
    }

    fn status_without_contexts(&self, combined: &CombinedStatus) -> RevisionStatus {
        let legacy_empty = combined.legacy.is_empty();
        let legacy_status = if legacy_empty {
            None
        } else {
            let failed = combined
                .legacy
                .iter()
                .any(|s| matches!(s.state, LegacyState::Failure | LegacyState::Error));
            let pending = combined.legacy.iter().any(|s| s.state == LegacyState::Pending);
            Some(if failed {
                RevisionStatus::Failure
            } else if pending {
                RevisionStatus::Pending
            } else {
                RevisionStatus::Success
            })
        };

        if combined.check_runs.is_empty() && !combined.check_suites_pending {
            // No legacy checks and nothing from the checks API: cannot verify.
            return legacy_status.unwrap_or(RevisionStatus::Failure);
        }

        let runs_failed = combined.check_runs.iter().any(|r| {
            r.status == CheckRunStatus::Completed
                && !matches!(r.conclusion, Some(CheckConclusion::Success) | Some(CheckConclusion::Skipped))
        });
        let runs_pending = combined.check_suites_pending
            || combined.check_runs.iter().any(|r| r.status != CheckRunStatus::Completed);
        let runs_status = if runs_failed {
            RevisionStatus::Failure
        } else if runs_pending {
            RevisionStatus::Pending
        } else {
            RevisionStatus::Success
        };

        match legacy_status {
            Some(legacy) => legacy.combine(runs_status),
            None => runs_status,
        }
    }
}

impl<C: StatusClient> StatusProvider for CiStatusProvider<C> {
    fn get_revision_status(&self, revision: &Revision) -> Result<RevisionStatus, CraftError> {
        let combined = self.combined(revision)?;
        Ok(if self.contexts.is_empty() {
            self.status_without_contexts(&combined)
        } else {
            self.status_by_named_contexts(&combined)
        })
    }

    fn get_failure_details(&self, revision: &Revision) -> Result<Vec<String>, CraftError> {
        let combined = self.combined(revision)?;
        let mut lines = Vec::new();

        for status in &combined.legacy {
            if matches!(status.state, LegacyState::Failure | LegacyState::Error) {
                let state = match status.state {
                    LegacyState::Failure => "FAILURE",
                    LegacyState::Error => "ERROR",
                    _ => unreachable!(),
                };
                match &status.target_url {
                    Some(url) => lines.push(format!("  {state}: {} \u{2192} {url}", status.context)),
                    None => lines.push(format!("  {state}: {}", status.context)),
                }
            }
        }

        for run in &combined.check_runs {
            if run.status != CheckRunStatus::Completed {
                continue;
            }
            if matches!(run.conclusion, Some(CheckConclusion::Success) | Some(CheckConclusion::Skipped)) {
                continue;
            }
            let conclusion = conclusion_label(run.conclusion);
            match &run.html_url {
                Some(url) => lines.push(format!("  {conclusion}: {} \u{2192} {url}", run.name)),
                None => lines.push(format!("  {conclusion}: {}", run.name)),
            }
        }

        lines.push(format!(
            "\nSee all checks: https://{}/{}/{}/commit/{revision}",
            self.host, self.owner, self.repo
        ));
        Ok(lines)
    }
}

fn conclusion_label(conclusion: Option<CheckConclusion>) -> &'static str {
    match conclusion {
        Some(CheckConclusion::Failure) => "FAILURE",
        Some(CheckConclusion::Cancelled) => "CANCELLED",
        Some(CheckConclusion::TimedOut) => "TIMED_OUT",
        Some(CheckConclusion::ActionRequired) => "ACTION_REQUIRED",
        Some(CheckConclusion::Neutral) => "NEUTRAL",
        Some(CheckConclusion::Success) | Some(CheckConclusion::Skipped) | None => "UNKNOWN",
    }
}
