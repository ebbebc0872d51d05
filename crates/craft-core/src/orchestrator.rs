//! Publish Orchestrator (§4.4): for one release, resolves the target set
//! from config, runs each configured [`Target`] in config order, and
//! collects outcomes.
//!
//! Fan-out bounds and cross-target shared resources (the registry clone's
//! mutex, the Maven staging singleton) live inside the targets themselves
//! ([`crate::targets::registry_target::RegistryShared`],
//! [`crate::targets::maven::staging`]) rather than here — the orchestrator's
//! own job is strictly sequencing and error-policy (§7: abort on fatal error;
//! in `dry-run`, log and keep going so the operator sees every problem in one
//! invocation).

use std::path::PathBuf;
use std::sync::Arc;

use craft_types::{CraftError, ReleaseContext, TargetConfig};

use crate::artifact_provider::ArtifactProvider;
use crate::factory;
use crate::reporter::Reporter;
use crate::target::PublishCtx;

/// What happened to one configured target at the end of a publish run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Published,
    Skipped { reason: String },
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct TargetResult {
    pub name: String,
    pub id: Option<String>,
    pub outcome: TargetOutcome,
}

/// Outcome of one `craft publish` invocation across every target it ran.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub results: Vec<TargetResult>,
}

impl PublishReport {
    /// `true` iff no target ended in `Failed`. A `dry-run` report may still
    /// carry failures (they're logged, not aborted on) — this reflects
    /// whether the *live* run would have succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self
            .results
            .iter()
            .any(|r| matches!(r.outcome, TargetOutcome::Failed { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, TargetOutcome::Failed { .. }))
    }
}

/// Sequences target execution for `craft publish`. Owns nothing but the
/// two inputs every target factory call needs beyond the per-target config:
/// the crate/workspace manifest path and the release registry's clone URL.
pub struct PublishOrchestrator {
    manifest_path: PathBuf,
    registry_repo_url: String,
}

impl PublishOrchestrator {
    pub fn new(manifest_path: PathBuf, registry_repo_url: impl Into<String>) -> Self {
        Self {
            manifest_path,
            registry_repo_url: registry_repo_url.into(),
        }
    }

    /// Run every target in `ctx.targets`, restricted to `selected` if given
    /// (the CLI's repeatable `--target <name>` flag), in config order (§5).
    pub fn publish(
        &self,
        ctx: &ReleaseContext,
        artifacts: Arc<dyn ArtifactProvider + Send + Sync>,
        selected: Option<&[String]>,
        reporter: &mut dyn Reporter,
    ) -> Result<PublishReport, CraftError> {
        let configs = self.resolve_configs(ctx, selected);
        let targets = factory::build_targets(&configs, &self.manifest_path, &self.registry_repo_url)?;

        let mut report = PublishReport::default();
        for (config, target) in configs.iter().zip(targets.iter()) {
            let label = target_label(config);
            reporter.info(&format!("publishing target {label}"));

            let mut pctx = PublishCtx {
                version: &ctx.version,
                revision: &ctx.revision,
                github_owner: &ctx.github_owner,
                github_repo: &ctx.github_repo,
                dry_run: ctx.dry_run,
                artifacts: Arc::clone(&artifacts),
                reporter: &mut *reporter,
            };

            match target.publish(&mut pctx) {
                Ok(()) => {
                    reporter.info(&format!("target {label} published"));
                    report.results.push(TargetResult {
                        name: config.name.clone(),
                        id: config.id.clone(),
                        outcome: TargetOutcome::Published,
                    });
                }
                Err(CraftError::NotFound { resource, message }) => {
                    let reason = format!("{resource}: {message}");
                    reporter.warn(&format!("target {label} skipped: {reason}"));
                    report.results.push(TargetResult {
                        name: config.name.clone(),
                        id: config.id.clone(),
                        outcome: TargetOutcome::Skipped { reason },
                    });
                }
                Err(err) => {
                    reporter.error(&format!("target {label} failed: {err}"));
                    report.results.push(TargetResult {
                        name: config.name.clone(),
                        id: config.id.clone(),
                        outcome: TargetOutcome::Failed {
                            message: err.to_string(),
                        },
                    });
                    if !ctx.dry_run {
                        return Err(err);
                    }
                }
            }
        }

        Ok(report)
    }

    fn resolve_configs(&self, ctx: &ReleaseContext, selected: Option<&[String]>) -> Vec<TargetConfig> {
        match selected {
            None => ctx.targets.clone(),
            Some(names) => ctx
                .targets
                .iter()
                .filter(|t| names.iter().any(|n| n == &t.name))
                .cloned()
                .collect(),
        }
    }
}

fn target_label(config: &TargetConfig) -> String {
    match &config.id {
        Some(id) => format!("{} ({id})", config.name),
        None => config.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use craft_types::{ArtifactNameFilter, ChecksumSpec, RemoteArtifact, Revision, Version};
    use std::collections::BTreeMap;
    use std::path::Path;

    struct EmptyArtifacts;

    impl ArtifactProvider for EmptyArtifacts {
        fn filter_artifacts_for_revision(
            &self,
            _revision: &Revision,
            _filter: &ArtifactNameFilter,
        ) -> Result<Vec<RemoteArtifact>, CraftError> {
            Ok(vec![])
        }

        fn download_artifact(
            &self,
            _artifact: &RemoteArtifact,
            _dst_dir: Option<&Path>,
        ) -> Result<PathBuf, CraftError> {
            unreachable!("no artifacts configured in this test")
        }

        fn get_checksum(&self, _artifact: &RemoteArtifact, _spec: ChecksumSpec) -> Result<String, CraftError> {
            unreachable!("no artifacts configured in this test")
        }
    }

    fn ctx(dry_run: bool, targets: Vec<TargetConfig>) -> ReleaseContext {
        ReleaseContext {
            version: Version::parse("1.0.0").unwrap(),
            revision: Revision::parse("1b843f2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaab38").unwrap(),
            github_owner: "getsentry".to_string(),
            github_repo: "craft".to_string(),
            dry_run,
            targets,
        }
    }

    fn target_config(name: &str, extra: &[(&str, serde_yaml::Value)]) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            id: None,
            filter: ArtifactNameFilter::default(),
            extra: extra.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn unknown_target_kind_is_fatal_before_any_publish_runs() {
        let orchestrator = PublishOrchestrator::new(PathBuf::from("Cargo.toml"), "https://example.invalid/r.git");
        let release = ctx(false, vec![target_config("not-a-real-target", &[])]);
        let mut reporter = crate::reporter::RecordingReporter::default();

        let err = orchestrator
            .publish(&release, Arc::new(EmptyArtifacts), None, &mut reporter)
            .unwrap_err();
        assert!(matches!(err, CraftError::Configuration { .. }));
    }

    #[test]
    fn target_filter_restricts_to_selected_names() {
        let orchestrator = PublishOrchestrator::new(PathBuf::from("Cargo.toml"), "https://example.invalid/r.git");
        let release = ctx(
            false,
            vec![target_config("crates", &[]), target_config("npm", &[])],
        );
        let selected = vec!["npm".to_string()];
        let configs = orchestrator.resolve_configs(&release, Some(&selected));
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "npm");
    }

    #[test]
    fn no_selection_runs_every_configured_target_in_order() {
        let orchestrator = PublishOrchestrator::new(PathBuf::from("Cargo.toml"), "https://example.invalid/r.git");
        let release = ctx(
            false,
            vec![target_config("crates", &[]), target_config("npm", &[])],
        );
        let configs = orchestrator.resolve_configs(&release, None);
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "crates");
        assert_eq!(configs[1].name, "npm");
    }

    #[test]
    fn target_label_includes_id_when_set() {
        let mut config = target_config("npm", &[]);
        config.id = Some("browser".to_string());
        assert_eq!(target_label(&config), "npm (browser)");
        assert_eq!(target_label(&target_config("crates", &[])), "crates");
    }

    #[test]
    fn publish_report_all_succeeded_false_when_any_target_failed() {
        let mut report = PublishReport::default();
        report.results.push(TargetResult {
            name: "npm".to_string(),
            id: None,
            outcome: TargetOutcome::Published,
        });
        assert!(report.all_succeeded());

        report.results.push(TargetResult {
            name: "pypi".to_string(),
            id: None,
            outcome: TargetOutcome::Failed {
                message: "boom".to_string(),
            },
        });
        assert!(!report.all_succeeded());
        assert_eq!(report.failures().count(), 1);
    }
}
