//! npm target (§4.4): pushes matched tarballs with `npm publish` (or
//! `yarn publish`), using a per-invocation auth file rather than mutating the
//! caller's `~/.npmrc`.

use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use craft_process::{run_command, run_command_in_dir};
use craft_types::{CraftError, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::{default_filter, npm_idempotent, publish_with_idempotent_retry};

/// §4.4: "require version ≥ 5.6 for npm" — the first npm release with a
/// built-in, non-interactive `npm publish` token-auth path this target
/// relies on.
const MINIMUM_NPM_VERSION: (u64, u64) = (5, 6);

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NpmConfig {
    /// `public` or `restricted`; required for scoped packages.
    pub access: Option<String>,
    #[serde(default)]
    pub use_yarn: bool,
    /// Current `latest` on the registry, used to decide `--tag=old`. Normally
    /// discovered via `npm info <pkg> version`; tests inject it directly.
    pub current_latest: Option<String>,
}

pub struct NpmTarget {
    pub config: NpmConfig,
}

impl NpmTarget {
    pub fn new(config: NpmConfig) -> Self {
        Self { config }
    }

    fn cli(&self) -> &'static str {
        if self.config.use_yarn { "yarn" } else { "npm" }
    }

    /// `--tag` value per §4.4: `next` for a pre-release version, `old` when
    /// strictly less than the registry's current latest (never demote
    /// `latest`), otherwise no explicit tag.
    fn dist_tag(&self, version: &Version) -> Option<&'static str> {
        if version.is_preview() {
            return Some("next");
        }
        if let Some(latest) = &self.config.current_latest
            && let Ok(latest) = Version::parse(latest)
            && *version < latest
        {
            return Some("old");
        }
        None
    }

    /// `npm --version` must be at least 5.6; `yarn` bundles its own
    /// `npm publish`-equivalent and isn't subject to this floor.
    fn check_cli_version(&self) -> Result<(), CraftError> {
        if self.config.use_yarn {
            return Ok(());
        }
        let result = run_command("npm", &["--version"]).map_err(|e| CraftError::transient(e.to_string()))?;
        if !result.success {
            return Err(CraftError::transient(format!("`npm --version` failed: {}", result.stderr)));
        }
        let raw = result.stdout.trim();
        let (major, minor) = parse_major_minor(raw)
            .ok_or_else(|| CraftError::configuration("npm", format!("could not parse `npm --version` output {raw:?}")))?;
        if (major, minor) < MINIMUM_NPM_VERSION {
            return Err(CraftError::configuration(
                "npm",
                format!("npm {raw} is older than the required minimum {}.{}", MINIMUM_NPM_VERSION.0, MINIMUM_NPM_VERSION.1),
            ));
        }
        Ok(())
    }
}

fn parse_major_minor(raw: &str) -> Option<(u64, u64)> {
    let mut parts = raw.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// `CRAFT_NPM_USE_OTP`: interactively prompt for a one-time password on
/// stdin and pass it through as `--otp=<code>`. Never prompts when stdin
/// isn't a terminal (CI) or during a dry run — there is no publish to
/// authorize yet.
fn prompt_for_otp() -> Result<Option<String>, CraftError> {
    if std::env::var("CRAFT_NPM_USE_OTP").is_err() {
        return Ok(None);
    }
    if !atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    print!("npm one-time password: ");
    io::stdout().flush().map_err(|e| CraftError::transient(e.to_string()))?;
    let mut otp = String::new();
    io::stdin().read_line(&mut otp).map_err(|e| CraftError::transient(e.to_string()))?;
    let otp = otp.trim().to_string();
    if otp.is_empty() {
        return Ok(None);
    }
    Ok(Some(otp))
}

impl Target for NpmTarget {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_filter("*.tgz");
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        if artifacts.is_empty() {
            return Err(CraftError::not_found("npm artifacts", "no *.tgz artifacts matched for this revision"));
        }

        if !ctx.dry_run {
            self.check_cli_version()?;
        }

        let npm_token = craft_auth::require_env("NPM_TOKEN")
            .map_err(|e| CraftError::configuration("NPM_TOKEN", e.to_string()))?;
        let otp = if ctx.dry_run { None } else { prompt_for_otp()? };

        for artifact in &artifacts {
            let path = ctx.artifacts.download_artifact(artifact, None)?;
            if ctx.dry_run {
                ctx.reporter.info(&format!("[dry-run] would run `{} publish` for {}", self.cli(), artifact.filename));
                continue;
            }

            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let authrc = dir.join(".npmrc");
            fs::write(&authrc, format!("//registry.npmjs.org/:_authToken={npm_token}\n"))
                .map_err(|e| CraftError::transient(format!("failed to write per-invocation .npmrc: {e}")))?;

            let mut args = vec!["publish".to_string(), path.display().to_string(), "--userconfig".to_string(), authrc.display().to_string()];
            if let Some(access) = &self.config.access {
                args.push(format!("--access={access}"));
            }
            if let Some(tag) = self.dist_tag(ctx.version) {
                args.push(format!("--tag={tag}"));
            }
            if let Some(otp) = &otp {
                args.push(format!("--otp={otp}"));
            }
            let cli = self.cli();

            publish_with_idempotent_retry(
                |_attempt| {
                    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                    run_command_in_dir(cli, &arg_refs, dir)
                },
                npm_idempotent,
            )?;
            ctx.reporter.info(&format!("published {} to npm", artifact.filename));
        }
        Ok(())
    }

    fn bump_version(&self, root_dir: &Path, version: &Version) -> anyhow::Result<bool> {
        let package_json = root_dir.join("package.json");
        if !package_json.exists() {
            return Ok(false);
        }
        let contents = fs::read_to_string(&package_json)?;
        let mut value: serde_json::Value = serde_json::from_str(&contents)?;
        let changed = value
            .get("version")
            .and_then(|v| v.as_str())
            .map(|current| current != version.to_string())
            .unwrap_or(true);
        if changed {
            value["version"] = serde_json::Value::String(version.to_string());
            fs::write(&package_json, format!("{}\n", serde_json::to_string_pretty(&value)?))?;
        }
        Ok(changed)
    }
}
