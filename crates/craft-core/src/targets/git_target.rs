//! Git-repository target (§4.7): publishes a tarball as the contents of a
//! branch in another repository. Everything happens inside a scoped temp
//! clone; the source checkout is never touched.

use std::path::Path;

use craft_process::run_command_in_dir;
use craft_types::{CraftError, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::default_filter;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitTargetConfig {
    pub repo_url: String,
    pub branch: String,
    #[serde(default)]
    pub strip_components: u32,
    pub tag_template: Option<String>,
    #[serde(default)]
    pub push_tags: bool,
}

pub struct GitRepoTarget {
    pub config: GitTargetConfig,
}

impl GitRepoTarget {
    pub fn new(config: GitTargetConfig) -> Self {
        Self { config }
    }
}

impl Target for GitRepoTarget {
    fn name(&self) -> &'static str {
        "git"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_filter("*.tar.gz");
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        let artifact = artifacts
            .first()
            .ok_or_else(|| CraftError::not_found("git target artifact", "no *.tar.gz artifact matched for this revision"))?;
        let tarball = ctx.artifacts.download_artifact(artifact, None)?;

        if ctx.dry_run {
            ctx.reporter.info(&format!(
                "[dry-run] would publish {} as the contents of {} on branch {}",
                artifact.filename, self.config.repo_url, self.config.branch
            ));
            return Ok(());
        }

        let workdir = tempfile::tempdir().map_err(|e| CraftError::transient(format!("failed to create temp dir: {e}")))?;
        let dir = workdir.path();

        run_checked(dir, "git", &["clone", "--branch", &self.config.branch, &self.config.repo_url, "."])?;
        run_checked(dir, "git", &["rm", "-r", "--ignore-unmatch", "."])?;

        let strip = self.config.strip_components.to_string();
        let tar_path = tarball.display().to_string();
        let mut tar_args = vec!["-xzf", &tar_path, "-C"];
        let dir_str = dir.display().to_string();
        tar_args.push(&dir_str);
        if self.config.strip_components > 0 {
            tar_args.push("--strip-components");
            tar_args.push(&strip);
        }
        let result = craft_process::run_command("tar", &tar_args).map_err(|e| CraftError::transient(e.to_string()))?;
        if !result.success {
            return Err(CraftError::transient(format!("tar extraction failed: {}", result.stderr)));
        }

        run_checked(dir, "git", &["add", "--all"])?;
        let message = format!("release: {}", ctx.version);
        run_checked(dir, "git", &["commit", "-m", &message])?;

        if let Some(template) = &self.config.tag_template {
            let vars = serde_json::json!({"version": ctx.version.to_string(), "revision": ctx.revision.as_str()});
            let tag = crate::template::render(template, &vars)?;
            run_checked(dir, "git", &["tag", &tag])?;
        }

        run_checked(dir, "git", &["push", "--force"])?;
        if self.config.push_tags {
            run_checked(dir, "git", &["push", "--tags"])?;
        }

        ctx.reporter.info(&format!("published to branch {} of {}", self.config.branch, self.config.repo_url));
        Ok(())
    }

    fn bump_version(&self, _root_dir: &Path, _version: &Version) -> anyhow::Result<bool> {
        Ok(false)
    }
}

fn run_checked(dir: &Path, program: &str, args: &[&str]) -> Result<(), CraftError> {
    let result = run_command_in_dir(program, args, dir).map_err(|e| CraftError::transient(e.to_string()))?;
    if !result.success {
        return Err(CraftError::transient(format!("{program} {args:?} failed: {}", result.stderr)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_strip_components_to_zero() {
        let config: GitTargetConfig = serde_yaml::from_str(
            "repoUrl: git@example.com:org/repo.git\nbranch: gh-pages\n",
        )
        .unwrap();
        assert_eq!(config.strip_components, 0);
        assert!(!config.push_tags);
    }
}
