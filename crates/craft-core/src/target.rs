//! The abstract `Target` contract (§4.3) and the name-keyed factory registry
//! that builds a concrete target from a `TargetConfig` (§9, "dynamic target
//! discovery": a registry keyed by name, no runtime reflection).

use std::path::Path;
use std::sync::Arc;

use craft_types::{CraftError, Revision, TargetConfig, Version};

use crate::artifact_provider::ArtifactProvider;
use crate::reporter::Reporter;

/// Everything a target's `publish` needs beyond its own config: the shared
/// artifact provider, the release identity, and the output seam.
pub struct PublishCtx<'a> {
    pub version: &'a Version,
    pub revision: &'a Revision,
    pub github_owner: &'a str,
    pub github_repo: &'a str,
    pub dry_run: bool,
    pub artifacts: Arc<dyn ArtifactProvider + Send + Sync>,
    pub reporter: &'a mut dyn Reporter,
}

/// Result of a target's project-introspection `detect`.
#[derive(Debug, Clone)]
pub struct DetectResult {
    pub config: TargetConfig,
    pub priority: i32,
    pub required_secrets: Vec<String>,
}

/// One publication protocol. `publish` is the only required operation;
/// `bump_version` and `detect` are opt-in auto-configuration hooks used by
/// the preparation pipeline.
pub trait Target {
    /// Kind name this target is registered under, e.g. `"npm"`.
    fn name(&self) -> &'static str;

    /// Perform the target's side effects. Must be idempotent at the release
    /// granularity: re-running with the same inputs succeeds if the release
    /// is already published at the destination.
    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError>;

    /// Deterministically rewrite this target's manifest files to `version`.
    /// Returns `true` iff at least one file changed. Must not perform
    /// network I/O.
    fn bump_version(&self, _root_dir: &Path, _version: &Version) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Inspect a root directory for auto-configuration.
    fn detect(&self, _root: &Path) -> Option<DetectResult> {
        None
    }
}

/// Default priority a target without an explicit priority constant is given
/// during `prepare`'s target ordering. Concrete priorities are informed by
/// the per-target constants below (§9's open question: treat these as input
/// data, not hard-coded rules).
pub const DEFAULT_TARGET_PRIORITY: i32 = 50;

/// Static per-target priority used only to order `bumpVersion` application
/// during `prepare` (lower runs first). Not used by `publish` ordering,
/// which always follows config order (§5).
pub fn default_priority(name: &str) -> i32 {
    match name {
        "crates" => 10,
        "npm" => 20,
        "pypi" => 20,
        "gem" => 20,
        "hex" => 20,
        "nuget" => 20,
        "pub-dev" => 20,
        "gcs" => 40,
        "maven" => 40,
        "git" => 60,
        "registry" => 90,
        _ => DEFAULT_TARGET_PRIORITY,
    }
}
