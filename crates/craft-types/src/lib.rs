//! Core domain types shared by every crate in the publish pipeline: versions,
//! revisions, artifacts, target configuration, and the classified error kinds
//! targets and providers return.
//!
//! Nothing here talks to a network or a filesystem; this crate is the
//! vocabulary the rest of the workspace is written in.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

mod error;
mod filter;
mod version;

pub use error::CraftError;
pub use filter::FilterPattern;
pub use version::{Version, VersionParseError};

/// Opaque 40-hex VCS SHA identifying a source tree. Immutable identity of a
/// release; never mutated once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Parse a 40-character hex SHA. Returns `CraftError::Configuration` for
    /// anything shorter, longer, or containing a non-hex character, since a
    /// malformed revision can never resolve to a real commit.
    pub fn parse(value: impl Into<String>) -> Result<Self, CraftError> {
        let value = value.into();
        if value.len() != 40 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CraftError::configuration(
                "revision",
                format!("expected a 40-character hex SHA, got {value:?}"),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in log lines and branch names, e.g. `1b843f2`.
    pub fn short(&self) -> &str {
        &self.0[..7]
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checksum algorithm supported by the artifact provider and the release
/// registry's `files[name].checksums` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Md5,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
            ChecksumAlgorithm::Md5 => "md5",
        };
        f.write_str(s)
    }
}

/// Text encoding a computed digest is rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumFormat {
    Hex,
    Base64,
    #[serde(rename = "base64url")]
    Base64Url,
}

/// `{algorithm, format}` pair. Both fields are required — there is no
/// "default algorithm" because the registry manifest key is
/// `"<algorithm>-<format>"` and an implicit default would make that key
/// ambiguous across configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChecksumSpec {
    pub algorithm: ChecksumAlgorithm,
    pub format: ChecksumFormat,
}

impl ChecksumSpec {
    pub fn new(algorithm: ChecksumAlgorithm, format: ChecksumFormat) -> Self {
        Self { algorithm, format }
    }

    /// The manifest key this spec is recorded under, e.g. `"sha256-hex"`.
    pub fn manifest_key(&self) -> String {
        let format = match self.format {
            ChecksumFormat::Hex => "hex",
            ChecksumFormat::Base64 => "base64",
            ChecksumFormat::Base64Url => "base64url",
        };
        format!("{}-{}", self.algorithm, format)
    }
}

/// A file handle on an artifact provider's backing store, local once
/// downloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub download_filepath: String,
    pub filename: String,
    pub size: u64,
}

/// A build artifact known to the provider but not necessarily downloaded yet.
/// `filename` is unique within one release bundle; `id` is the provider's
/// stable identifier used for de-duplication across paginated listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteArtifact {
    pub id: u64,
    pub filename: String,
    pub mime_type: String,
    pub stored_file: Option<StoredFile>,
}

impl RemoteArtifact {
    /// De-duplicate a list of artifacts by stable id, keeping the first
    /// occurrence. The provider's listing order is not guaranteed to be
    /// stable across pages, so callers must never rely on this preserving
    /// any particular ordering beyond first-seen-wins.
    pub fn dedup_by_id(artifacts: Vec<RemoteArtifact>) -> Vec<RemoteArtifact> {
        let mut seen = std::collections::HashSet::new();
        artifacts
            .into_iter()
            .filter(|a| seen.insert(a.id))
            .collect()
    }
}

/// Include/exclude regex pair used to narrow an artifact list to the files a
/// target actually wants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactNameFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_names: Option<FilterPattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_names: Option<FilterPattern>,
}

impl ArtifactNameFilter {
    pub fn matches(&self, filename: &str) -> bool {
        let included = self
            .include_names
            .as_ref()
            .is_none_or(|p| p.is_match(filename));
        let excluded = self
            .exclude_names
            .as_ref()
            .is_some_and(|p| p.is_match(filename));
        included && !excluded
    }
}

/// A workflow-run/artifact filter pair for the artifact provider's
/// workflow-run lookup strategy. `artifacts` must be non-empty: a filter with
/// no artifact pattern can never match anything, which almost certainly means
/// misconfiguration rather than "match nothing".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowArtifactFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<FilterPattern>,
    pub artifacts: Vec<FilterPattern>,
}

/// Config for one configured target: `{name, id?, includeNames?,
/// excludeNames?, ...}`. Target-specific fields live in `extra` as raw YAML
/// values; each target's own config struct is deserialized from
/// `extra` by the orchestrator when it constructs that target.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub id: Option<String>,
    #[serde(flatten)]
    pub filter: ArtifactNameFilter,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl TargetConfig {
    /// The identity a release's target list is deduplicated on: `(name, id)`.
    pub fn identity(&self) -> (&str, Option<&str>) {
        (&self.name, self.id.as_deref())
    }
}

/// Staging-repository lifecycle state for the Maven/Sonatype target.
/// Progression is monotone: `Open -> Closed -> Released`, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NexusRepositoryState {
    Open,
    Closed,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusRepository {
    pub repository_id: String,
    pub state: NexusRepositoryState,
    pub deployment_id: String,
}

/// One package's entry under `packages/{sdk|app}/<canonical>/` in the release
/// registry: the manifest that gets written to `<version>.json` and pointed
/// at by `latest.json`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryManifest {
    pub canonical: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub files: Option<BTreeMap<String, RegistryFileEntry>>,
    pub file_urls: Option<BTreeMap<String, String>>,
    pub repo_url: String,
    pub name: Option<String>,
    pub package_url: Option<String>,
    pub main_docs_url: Option<String>,
    pub api_docs_url: Option<String>,
    /// Any additional keys carried over from the previous manifest version
    /// (SDK-specific fields this crate doesn't model explicitly).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFileEntry {
    pub url: Option<String>,
    pub checksums: Option<BTreeMap<String, String>>,
}

/// The inputs fixed for the lifetime of one `craft publish` invocation.
#[derive(Debug, Clone)]
pub struct ReleaseContext {
    pub version: Version,
    pub revision: Revision,
    pub github_owner: String,
    pub github_repo: String,
    pub dry_run: bool,
    pub targets: Vec<TargetConfig>,
}

impl ReleaseContext {
    pub fn github_repo_slug(&self) -> String {
        format!("{}/{}", self.github_owner, self.github_repo)
    }
}

/// Aggregated revision status returned by the status provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    Success,
    Pending,
    Failure,
    NotFound,
}

impl RevisionStatus {
    /// Combine two verdicts under the documented precedence Failure > Pending
    /// > Success, used both for the `contexts`-empty union algorithm and for
    /// merging named-context results.
    pub fn combine(self, other: RevisionStatus) -> RevisionStatus {
        use RevisionStatus::*;
        match (self, other) {
            (Failure, _) | (_, Failure) => Failure,
            (Pending, _) | (_, Pending) => Pending,
            (NotFound, NotFound) => NotFound,
            _ => Success,
        }
    }
}

/// Ordering used only for documentation purposes in tests that assert the
/// union-precedence rule holds; not used by production matching logic
/// (`combine` above implements the real rule directly).
impl PartialOrd for RevisionStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        fn rank(s: &RevisionStatus) -> u8 {
            match s {
                RevisionStatus::Failure => 3,
                RevisionStatus::Pending => 2,
                RevisionStatus::NotFound => 1,
                RevisionStatus::Success => 0,
            }
        }
        rank(self).partial_cmp(&rank(other))
    }
}
