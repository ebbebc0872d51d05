//! PyPI target (§4.4): a single `twine upload` invocation with **all**
//! matched files passed together, never one-by-one — twine's own retry on a
//! half-uploaded batch would otherwise re-upload files that already
//! succeeded.

use std::path::Path;

use craft_process::run_command_with_env;
use craft_types::{ArtifactNameFilter, CraftError, FilterPattern, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::{publish_with_idempotent_retry, pypi_idempotent};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PypiConfig {
    #[serde(default)]
    pub repository_url: Option<String>,
}

pub struct PypiTarget {
    pub config: PypiConfig,
}

impl PypiTarget {
    pub fn new(config: PypiConfig) -> Self {
        Self { config }
    }
}

/// `/^.*\d\.\d.*(\.whl|\.gz|\.zip)$/` — the documented default filter.
fn default_pypi_filter() -> ArtifactNameFilter {
    ArtifactNameFilter {
        include_names: Some(
            FilterPattern::compile(r"/^.*\d\.\d.*(\.whl|\.gz|\.zip)$/").expect("built-in pattern compiles"),
        ),
        exclude_names: None,
    }
}

impl Target for PypiTarget {
    fn name(&self) -> &'static str {
        "pypi"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_pypi_filter();
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        if artifacts.is_empty() {
            return Err(CraftError::not_found("pypi artifacts", "no wheel/sdist artifacts matched for this revision"));
        }

        let mut paths = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            paths.push(ctx.artifacts.download_artifact(artifact, None)?);
        }

        if ctx.dry_run {
            ctx.reporter.info(&format!("[dry-run] would run `twine upload` for {} files", paths.len()));
            return Ok(());
        }

        let username = craft_auth::require_env("TWINE_USERNAME")
            .map_err(|e| CraftError::configuration("TWINE_USERNAME", e.to_string()))?;
        let password = craft_auth::require_env("TWINE_PASSWORD")
            .map_err(|e| CraftError::configuration("TWINE_PASSWORD", e.to_string()))?;

        let mut args: Vec<String> = vec!["upload".to_string()];
        if let Some(url) = &self.config.repository_url {
            args.push("--repository-url".to_string());
            args.push(url.clone());
        }
        for path in &paths {
            args.push(path.display().to_string());
        }
        let env = vec![
            ("TWINE_USERNAME".to_string(), username),
            ("TWINE_PASSWORD".to_string(), password),
            ("TWINE_NON_INTERACTIVE".to_string(), "1".to_string()),
        ];

        publish_with_idempotent_retry(
            |_attempt| {
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                run_command_with_env("twine", &arg_refs, &env)
            },
            pypi_idempotent,
        )?;
        ctx.reporter.info(&format!("published {} files to pypi", paths.len()));
        Ok(())
    }

    fn bump_version(&self, _root_dir: &Path, _version: &Version) -> anyhow::Result<bool> {
        Ok(false)
    }
}
