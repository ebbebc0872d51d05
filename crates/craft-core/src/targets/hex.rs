//! Hex target (§4.4): clones the repository into a temp directory and runs
//! the `mix` toolchain there rather than publishing from the CI checkout
//! directly, so `mix deps.get` runs against a clean tree.

use std::path::Path;

use craft_process::run_command_in_dir;
use craft_types::{CraftError, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::{hex_idempotent, publish_with_idempotent_retry};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HexConfig {
    pub repo_url: String,
}

pub struct HexTarget {
    pub config: HexConfig,
}

impl HexTarget {
    pub fn new(config: HexConfig) -> Self {
        Self { config }
    }
}

impl Target for HexTarget {
    fn name(&self) -> &'static str {
        "hex"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        if ctx.dry_run {
            ctx.reporter.info("[dry-run] would clone repo and run `mix hex.publish --yes`");
            return Ok(());
        }

        let api_key = craft_auth::require_env("HEX_API_KEY")
            .map_err(|e| CraftError::configuration("HEX_API_KEY", e.to_string()))?;

        let workdir = tempfile::tempdir().map_err(|e| CraftError::transient(format!("failed to create temp dir: {e}")))?;
        craft_git::clone(&self.config.repo_url, workdir.path())
            .map_err(|e| CraftError::transient(format!("git clone failed: {e}")))?;

        for (program, args) in [
            ("mix", vec!["local.hex", "--force"]),
            ("mix", vec!["local.rebar", "--force"]),
            ("mix", vec!["deps.get"]),
        ] {
            let result = run_command_in_dir(program, &args, workdir.path())
                .map_err(|e| CraftError::transient(e.to_string()))?;
            if !result.success {
                return Err(CraftError::transient(format!("{program} {args:?} failed: {}", result.stderr)));
            }
        }

        let env = vec![("HEX_API_KEY".to_string(), api_key)];
        publish_with_idempotent_retry(
            |_attempt| {
                let mut cmd = std::process::Command::new("mix");
                cmd.args(["hex.publish", "--yes"]).current_dir(workdir.path());
                for (k, v) in &env {
                    cmd.env(k, v);
                }
                let start = std::time::Instant::now();
                let output = cmd.output()?;
                Ok(craft_process::CommandResult::from_output(&output, start.elapsed()))
            },
            hex_idempotent,
        )?;
        ctx.reporter.info(&format!("published version {} to hex", ctx.version));
        Ok(())
    }

    fn bump_version(&self, root_dir: &Path, version: &Version) -> anyhow::Result<bool> {
        let mix_exs = root_dir.join("mix.exs");
        if !mix_exs.exists() {
            return Ok(false);
        }
        let contents = std::fs::read_to_string(&mix_exs)?;
        let version_re = regex::Regex::new(r#"(version:\s*)"[^"]*""#)?;
        let at_version_re = regex::Regex::new(r#"(@version\s+)"[^"]*""#)?;
        let mut rewritten = version_re
            .replace(&contents, format!("${{1}}\"{version}\"").as_str())
            .into_owned();
        rewritten = at_version_re
            .replace(&rewritten, format!("${{1}}\"{version}\"").as_str())
            .into_owned();
        if rewritten == contents {
            return Ok(false);
        }
        std::fs::write(&mix_exs, rewritten)?;
        Ok(true)
    }
}
