//! Crates target (§4.4): one `cargo publish` per workspace package, via
//! `craft_cargo`. `bumpVersion` delegates to `cargo set-version`.

use std::path::Path;
use std::time::Duration;

use craft_cargo::{cargo_publish, cargo_set_version, WorkspaceMetadata};
use craft_types::{CraftError, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::{crates_idempotent, default_filter};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CratesConfig {
    #[serde(default)]
    pub registry_name: Option<String>,
    #[serde(default)]
    pub no_verify: bool,
}

pub struct CratesTarget {
    pub config: CratesConfig,
    pub manifest_path: std::path::PathBuf,
}

impl CratesTarget {
    pub fn new(config: CratesConfig, manifest_path: std::path::PathBuf) -> Self {
        Self { config, manifest_path }
    }
}

impl Target for CratesTarget {
    fn name(&self) -> &'static str {
        "crates"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_filter("*.crate");
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        if artifacts.is_empty() {
            ctx.reporter.warn("no *.crate artifacts matched for this revision; nothing to publish");
        }

        let metadata = WorkspaceMetadata::load(&self.manifest_path)
            .map_err(|e| CraftError::configuration("manifest_path", e.to_string()))?;
        let workspace_root = metadata.workspace_root().to_path_buf();
        let registry_name = self.config.registry_name.clone().unwrap_or_else(|| "crates-io".to_string());

        for package in metadata.publishable_packages() {
            if ctx.dry_run {
                ctx.reporter.info(&format!("[dry-run] would run `cargo publish -p {}`", package.name));
                continue;
            }

            let name = package.name.to_string();
            let registry = registry_name.clone();
            let no_verify = self.config.no_verify;
            let result = craft_retry::retry_spawn_process(
                |_attempt| -> Result<(), String> {
                    let output = cargo_publish(&workspace_root, &name, &registry, false, no_verify, 200, Some(Duration::from_secs(600)))
                        .map_err(|e| e.to_string())?;
                    if output.exit_code == 0 {
                        Ok(())
                    } else {
                        Err(output.stderr_tail)
                    }
                },
                |err: &String| !crates_idempotent(err),
            );

            match result {
                Ok(()) => ctx.reporter.info(&format!("published {name} to {registry_name}")),
                Err(stderr) if crates_idempotent(&stderr) => {
                    ctx.reporter.info(&format!("{name} already present on {registry_name}, treating as success"));
                }
                Err(stderr) => return Err(CraftError::transient(format!("cargo publish -p {name} failed: {stderr}"))),
            }
        }
        Ok(())
    }

    fn bump_version(&self, root_dir: &Path, version: &Version) -> anyhow::Result<bool> {
        let manifest = root_dir.join("Cargo.toml");
        cargo_set_version(&manifest, &version.to_string())
    }
}
