//! Gem target (§4.4): `gem push` for each matched `.gem` file. `bumpVersion`
//! rewrites every discovered `*.gemspec` and its sibling `lib/**/version.rb`.

use std::fs;
use std::path::{Path, PathBuf};

use craft_process::run_command_with_env;
use craft_types::{CraftError, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::{default_filter, gem_idempotent, publish_with_idempotent_retry};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GemConfig {}

pub struct GemTarget {
    pub config: GemConfig,
}

impl GemTarget {
    pub fn new(config: GemConfig) -> Self {
        Self { config }
    }
}

impl Target for GemTarget {
    fn name(&self) -> &'static str {
        "gem"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_filter("*.gem");
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        if artifacts.is_empty() {
            return Err(CraftError::not_found("gem artifacts", "no *.gem artifacts matched for this revision"));
        }

        let api_key = craft_auth::require_env("GEM_HOST_API_KEY")
            .map_err(|e| CraftError::configuration("GEM_HOST_API_KEY", e.to_string()))?;

        for artifact in &artifacts {
            let path = ctx.artifacts.download_artifact(artifact, None)?;
            if ctx.dry_run {
                ctx.reporter.info(&format!("[dry-run] would run `gem push {}`", artifact.filename));
                continue;
            }

            let path_str = path.display().to_string();
            let env = vec![("GEM_HOST_API_KEY".to_string(), api_key.clone())];
            publish_with_idempotent_retry(
                |_attempt| run_command_with_env("gem", &["push", &path_str], &env),
                gem_idempotent,
            )?;
            ctx.reporter.info(&format!("pushed {}", artifact.filename));
        }
        Ok(())
    }

    fn bump_version(&self, root_dir: &Path, version: &Version) -> anyhow::Result<bool> {
        let gemspecs = find_gemspecs(root_dir, 2)?;
        let mut changed = false;
        for gemspec in &gemspecs {
            changed |= rewrite_gemspec_version(gemspec, version)?;
            if let Some(gem_dir) = gemspec.parent() {
                changed |= rewrite_version_rb_files(gem_dir, version)?;
            }
        }
        Ok(changed)
    }
}

/// Glob `*.gemspec` up to `max_depth` directories below `root`. Directories
/// commonly excluded from version control (`.git`, `vendor`, `pkg`) are
/// skipped as a practical stand-in for full `.gitignore` evaluation.
fn find_gemspecs(root: &Path, max_depth: usize) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_gemspecs(root, max_depth, &mut found)?;
    Ok(found)
}

fn collect_gemspecs(dir: &Path, depth_remaining: usize, found: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if matches!(name, ".git" | "vendor" | "pkg" | "node_modules" | "target") {
                continue;
            }
            if depth_remaining > 0 {
                collect_gemspecs(&path, depth_remaining - 1, found)?;
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some("gemspec") {
            found.push(path);
        }
    }
    Ok(())
}

fn rewrite_gemspec_version(path: &Path, version: &Version) -> anyhow::Result<bool> {
    let contents = fs::read_to_string(path)?;
    let re = regex::Regex::new(r#"(s\.version\s*=\s*)["'][^"']*["']"#)?;
    let target = format!("${{1}}\"{version}\"");
    let rewritten = re.replace_all(&contents, target.as_str());
    if rewritten == contents {
        return Ok(false);
    }
    fs::write(path, rewritten.as_ref())?;
    Ok(true)
}

fn rewrite_version_rb_files(gem_dir: &Path, version: &Version) -> anyhow::Result<bool> {
    let pattern = gem_dir.join("lib/**/version.rb");
    let pattern = pattern.to_string_lossy().to_string();
    let mut changed = false;
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        let contents = fs::read_to_string(&path)?;
        let re = regex::Regex::new(r#"(VERSION\s*=\s*)["'][^"']*["']"#)?;
        let target = format!("${{1}}\"{version}\"");
        let rewritten = re.replace_all(&contents, target.as_str());
        if rewritten != contents {
            fs::write(&path, rewritten.as_ref())?;
            changed = true;
        }
    }
    Ok(changed)
}
