//! The `.craft.yml` data shapes and a thin YAML loader.
//!
//! Loading and schema validation beyond what `serde` gives for free are
//! someone else's job; this crate only owns the typed shape of the config
//! file and the handful of env-var overrides craft recognizes, merged the
//! way the rest of the config layer is merged.
//!
//! # Example
//!
//! ```
//! use craft_config::Config;
//!
//! let yaml = r#"
//! minVersion: "1.0.0"
//! github:
//!   owner: getsentry
//!   repo: craft
//! targets:
//!   - name: crates
//! "#;
//!
//! let config = Config::from_yaml_str(yaml).expect("parse");
//! assert_eq!(config.github.repo, "craft");
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use craft_types::{CraftError, TargetConfig, Version};
use serde::{Deserialize, Serialize};

/// Default file name craft looks for at the root of a project.
pub const CONFIG_FILE: &str = ".craft.yml";

/// Versioning/changelog policy shared by `versioning.policy` and
/// `changelog.policy`: `none` leaves the concern untouched, `simple` applies
/// the minimal deterministic behavior, `auto` derives it (from commit
/// history for versioning, from commit messages for changelog entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[default]
    None,
    Simple,
    Auto,
}

/// `github.{owner,repo}` — identifies the repository a release belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubConfig {
    pub owner: String,
    pub repo: String,
}

impl GithubConfig {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// `versioning.policy` plus anything specific to how `prepare` derives a
/// version when none is given on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersioningConfig {
    #[serde(default)]
    pub policy: Policy,
}

/// `changelog.policy` plus the file conventional-commit-derived entries are
/// appended to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogConfig {
    #[serde(default)]
    pub policy: Policy,
    #[serde(default = "default_changelog_path")]
    pub path: String,
}

fn default_changelog_path() -> String {
    "CHANGELOG.md".to_string()
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            path: default_changelog_path(),
        }
    }
}

/// The full, typed contents of a `.craft.yml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Minimum version this config is valid for; `prepare`/`publish` reject
    /// an older requested version with a `Configuration` error.
    #[serde(rename = "minVersion", skip_serializing_if = "Option::is_none")]
    pub min_version: Option<Version>,

    pub github: GithubConfig,

    #[serde(default)]
    pub versioning: VersioningConfig,

    #[serde(default)]
    pub changelog: ChangelogConfig,

    #[serde(rename = "preReleaseCommand", skip_serializing_if = "Option::is_none")]
    pub pre_release_command: Option<String>,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Parse a `.craft.yml` document from its raw text.
    pub fn from_yaml_str(input: &str) -> Result<Self, CraftError> {
        serde_yaml::from_str(input).map_err(|e| CraftError::configuration("<root>", e.to_string()))
    }

    /// Load and parse a config file from an explicit path.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load `.craft.yml` from a project root directory.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_file(&dir.join(CONFIG_FILE))
    }

    /// Reject a requested version below `minVersion`, if configured.
    pub fn check_min_version(&self, requested: &Version) -> Result<(), CraftError> {
        if let Some(min) = &self.min_version {
            if requested < min {
                return Err(CraftError::configuration(
                    "minVersion",
                    format!("requested version {requested} is below minVersion {min}"),
                ));
            }
        }
        Ok(())
    }

    /// Target configs matching a given target kind name, in config order.
    pub fn targets_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a TargetConfig> {
        self.targets.iter().filter(move |t| t.name == name)
    }

    /// Render as the JSON document `craft config` prints to stdout.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize config to JSON")
    }
}

/// Locate `.craft.yml` by walking up from `start_dir` toward the filesystem
/// root, the same way git locates `.git`.
pub fn find_config(start_dir: &Path) -> Option<std::path::PathBuf> {
    let mut current = start_dir;
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        current = current.parent()?;
    }
}
