//! Dart pub.dev target (§4.4). The spec only documents `bumpVersion` for this
//! target (`version:` in `pubspec.yaml`); `publish` runs `dart pub publish`
//! directly against the package directory named in config rather than an
//! artifact bundle, since pub.dev publishes the source tree itself, not a
//! built archive (recorded as a resolved Open Question in the design ledger).

use std::path::{Path, PathBuf};

use craft_process::run_command_in_dir;
use craft_types::{CraftError, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::publish_with_idempotent_retry;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubDevConfig {
    pub package_dir: PathBuf,
}

pub struct PubDevTarget {
    pub config: PubDevConfig,
}

impl PubDevTarget {
    pub fn new(config: PubDevConfig) -> Self {
        Self { config }
    }
}

fn pub_already_published(stderr: &str) -> bool {
    stderr.contains("already exists") || stderr.contains("version already published")
}

impl Target for PubDevTarget {
    fn name(&self) -> &'static str {
        "pub-dev"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        if ctx.dry_run {
            ctx.reporter.info("[dry-run] would run `dart pub publish --force`");
            return Ok(());
        }
        let package_dir = self.config.package_dir.clone();
        publish_with_idempotent_retry(
            |_attempt| run_command_in_dir("dart", &["pub", "publish", "--force"], &package_dir),
            pub_already_published,
        )?;
        ctx.reporter.info(&format!("published {} to pub.dev", ctx.version));
        Ok(())
    }

    fn bump_version(&self, root_dir: &Path, version: &Version) -> anyhow::Result<bool> {
        let pubspec = root_dir.join("pubspec.yaml");
        if !pubspec.exists() {
            return Ok(false);
        }
        let contents = std::fs::read_to_string(&pubspec)?;
        let re = regex::Regex::new(r"(?m)^(version:\s*)\S+")?;
        let replacement = format!("${{1}}{version}");
        let rewritten = re.replace(&contents, replacement.as_str());
        if rewritten == contents {
            return Ok(false);
        }
        std::fs::write(&pubspec, rewritten.as_ref())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_version_rewrites_pubspec_version_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pubspec.yaml"), "name: demo\nversion: 0.1.0\n").unwrap();
        let target = PubDevTarget::new(PubDevConfig { package_dir: dir.path().to_path_buf() });
        let changed = target.bump_version(dir.path(), &Version::parse("0.2.0").unwrap()).unwrap();
        assert!(changed);
        let contents = std::fs::read_to_string(dir.path().join("pubspec.yaml")).unwrap();
        assert!(contents.contains("version: 0.2.0"));
    }

    #[test]
    fn bump_version_is_no_op_without_pubspec() {
        let dir = tempfile::tempdir().unwrap();
        let target = PubDevTarget::new(PubDevConfig { package_dir: dir.path().to_path_buf() });
        let changed = target.bump_version(dir.path(), &Version::parse("0.2.0").unwrap()).unwrap();
        assert!(!changed);
    }
}
