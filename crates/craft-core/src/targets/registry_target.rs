//! Release-registry target (§4.8): publishes JSON manifests into a central
//! registry repository. Multiple registry entries in one release share a
//! single clone and a single commit+push — the last entry to finish is the
//! one that actually pushes, so concurrent entries never race each other's
//! pushes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use craft_process::run_command_in_dir;
use craft_types::{ChecksumSpec, CraftError, FilterPattern, RegistryFileEntry, RegistryManifest, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Sdk,
    App,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntryConfig {
    pub canonical: String,
    pub kind: PackageKind,
    pub repo_url: String,
    pub url_template: Option<String>,
    #[serde(default)]
    pub checksums: Vec<ChecksumSpec>,
    #[serde(default = "default_true")]
    pub link_prereleases: bool,
    pub only_if_present: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Shared per-release state for every configured registry entry: the single
/// clone, and a countdown of how many entries remain so only the last one
/// commits and pushes.
pub struct RegistryShared {
    registry_repo_url: String,
    clone_dir: Mutex<Option<PathBuf>>,
    remaining: Mutex<usize>,
}

impl RegistryShared {
    pub fn new(registry_repo_url: impl Into<String>, entry_count: usize) -> Arc<Self> {
        Arc::new(Self {
            registry_repo_url: registry_repo_url.into(),
            clone_dir: Mutex::new(None),
            remaining: Mutex::new(entry_count),
        })
    }

    fn ensure_cloned(&self) -> Result<PathBuf, CraftError> {
        let mut guard = self.clone_dir.lock().expect("registry clone mutex poisoned");
        if let Some(dir) = guard.as_ref() {
            return Ok(dir.clone());
        }
        let workdir = tempfile::tempdir().map_err(|e| CraftError::transient(e.to_string()))?;
        let path = workdir.keep();
        craft_git::clone(&self.registry_repo_url, &path).map_err(|e| CraftError::transient(format!("registry clone failed: {e}")))?;
        *guard = Some(path.clone());
        Ok(path)
    }

    /// Called once this entry has written its manifest. Returns `true` iff
    /// this call was the last outstanding entry, i.e. this caller owns the
    /// commit+push.
    fn finish_entry(&self) -> bool {
        let mut remaining = self.remaining.lock().expect("registry countdown mutex poisoned");
        *remaining = remaining.saturating_sub(1);
        *remaining == 0
    }
}

pub struct RegistryTarget {
    pub config: RegistryEntryConfig,
    pub shared: Arc<RegistryShared>,
}

impl RegistryTarget {
    pub fn new(config: RegistryEntryConfig, shared: Arc<RegistryShared>) -> Self {
        Self { config, shared }
    }

    fn should_skip(&self, ctx: &PublishCtx<'_>) -> Result<bool, CraftError> {
        if !self.config.link_prereleases && ctx.version.is_preview() {
            return Ok(true);
        }
        if let Some(pattern) = &self.config.only_if_present {
            let regex = FilterPattern::compile(pattern)
                .map_err(|e| CraftError::configuration("targets.registry.onlyIfPresent", e.to_string()))?;
            let filter = craft_types::ArtifactNameFilter { include_names: Some(regex), exclude_names: None };
            let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
            if artifacts.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Target for RegistryTarget {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        if self.should_skip(ctx)? {
            ctx.reporter.info(&format!("skipping registry entry {} (policy excludes this release)", self.config.canonical));
            self.shared.finish_entry();
            return Ok(());
        }

        let clone_dir = self.shared.ensure_cloned()?;
        let kind_dir = match self.config.kind {
            PackageKind::Sdk => "sdk",
            PackageKind::App => "app",
        };
        let package_dir = clone_dir.join("packages").join(kind_dir).join(&self.config.canonical);
        std::fs::create_dir_all(&package_dir).map_err(|e| CraftError::transient(e.to_string()))?;

        let latest_path = package_dir.join("latest.json");
        let version_path = package_dir.join(format!("{}.json", ctx.version));
        if version_path.exists() {
            return Err(CraftError::precondition_failed(format!(
                "{}.json already exists for {}",
                ctx.version, self.config.canonical
            )));
        }

        let mut manifest = if latest_path.exists() {
            let raw = std::fs::read_to_string(&latest_path).map_err(|e| CraftError::transient(e.to_string()))?;
            serde_json::from_str::<RegistryManifest>(&raw).map_err(|e| CraftError::configuration("registry manifest", e.to_string()))?
        } else {
            RegistryManifest {
                canonical: self.config.canonical.clone(),
                version: String::new(),
                created_at: Utc::now(),
                files: None,
                file_urls: None,
                repo_url: self.config.repo_url.clone(),
                name: None,
                package_url: None,
                main_docs_url: None,
                api_docs_url: None,
                extra: BTreeMap::new(),
            }
        };

        let previous_version = if manifest.version.is_empty() { None } else { Some(manifest.version.clone()) };

        manifest.version = ctx.version.to_string();
        manifest.created_at = Utc::now();
        manifest.repo_url = self.config.repo_url.clone();

        if self.config.kind == PackageKind::App && self.config.url_template.is_some() {
            let filter = craft_types::ArtifactNameFilter::default();
            let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
            let mut file_urls = BTreeMap::new();
            for artifact in &artifacts {
                let vars = serde_json::json!({
                    "file": artifact.filename,
                    "revision": ctx.revision.as_str(),
                    "version": ctx.version.to_string(),
                });
                let rendered = crate::template::render(self.config.url_template.as_ref().unwrap(), &vars)?;
                file_urls.insert(artifact.filename.clone(), rendered);
            }
            manifest.file_urls = Some(file_urls);
        }

        if self.config.url_template.is_some() || !self.config.checksums.is_empty() {
            let filter = craft_types::ArtifactNameFilter::default();
            let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
            let mut files = BTreeMap::new();
            for artifact in &artifacts {
                let mut checksums = BTreeMap::new();
                for spec in &self.config.checksums {
                    let digest = ctx.artifacts.get_checksum(artifact, *spec)?;
                    checksums.insert(spec.manifest_key(), digest);
                }
                files.insert(
                    artifact.filename.clone(),
                    RegistryFileEntry {
                        url: manifest.file_urls.as_ref().and_then(|m| m.get(&artifact.filename)).cloned(),
                        checksums: if checksums.is_empty() { None } else { Some(checksums) },
                    },
                );
            }
            manifest.files = Some(files);
        }

        let serialized = serde_json::to_string_pretty(&manifest).map_err(|e| CraftError::transient(e.to_string()))?;
        std::fs::write(&version_path, &serialized).map_err(|e| CraftError::transient(e.to_string()))?;

        let version_filename = format!("{}.json", ctx.version);
        symlink_to(&latest_path, &version_filename)?;
        symlink_to(&package_dir.join(format!("{}.json", ctx.version.major)), &version_filename)?;
        symlink_to(&package_dir.join(format!("{}.{}.json", ctx.version.major, ctx.version.minor)), &version_filename)?;

        if let Some(previous) = previous_version.as_deref() {
            prune_stale_symlinks(&package_dir, previous, &version_filename)?;
        }

        ctx.reporter.info(&format!("wrote registry manifest for {} {}", self.config.canonical, ctx.version));

        if self.shared.finish_entry() {
            commit_and_push(&clone_dir, ctx, ctx.dry_run)?;
        }
        Ok(())
    }

    fn bump_version(&self, _root_dir: &Path, _version: &Version) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Point the symlink at `link_path` to `target_filename` (a bare filename
/// within the same directory), replacing any existing symlink atomically via
/// a same-directory temp-file rename.
fn symlink_to(link_path: &Path, target_filename: &str) -> Result<(), CraftError> {
    let parent = link_path.parent().expect("registry manifest path always has a parent directory");
    let tmp_path = parent.join(format!(".{}.tmp-{}", target_filename, std::process::id()));
    let _ = std::fs::remove_file(&tmp_path);
    std::os::unix::fs::symlink(target_filename, &tmp_path).map_err(|e| CraftError::transient(e.to_string()))?;
    std::fs::rename(&tmp_path, link_path).map_err(|e| CraftError::transient(e.to_string()))?;
    Ok(())
}

/// Remove symlinks in `package_dir` that still point at `previous_version`'s
/// manifest file — stale major/minor pointers left behind by a release that
/// moved the major or minor line forward. `current_version_filename` is
/// never a candidate since it was just (re)pointed at the new version.
fn prune_stale_symlinks(package_dir: &Path, previous_version: &str, current_version_filename: &str) -> Result<(), CraftError> {
    let previous_filename = format!("{previous_version}.json");
    let entries = std::fs::read_dir(package_dir).map_err(|e| CraftError::transient(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| CraftError::transient(e.to_string()))?;
        let path = entry.path();
        if path.file_name().and_then(|f| f.to_str()) == Some(current_version_filename) {
            continue;
        }
        let Ok(metadata) = std::fs::symlink_metadata(&path) else { continue };
        if !metadata.file_type().is_symlink() {
            continue;
        }
        let Ok(target) = std::fs::read_link(&path) else { continue };
        if target.to_string_lossy() == previous_filename {
            std::fs::remove_file(&path).map_err(|e| CraftError::transient(e.to_string()))?;
        }
    }
    Ok(())
}

fn commit_and_push(clone_dir: &Path, ctx: &mut PublishCtx<'_>, dry_run: bool) -> Result<(), CraftError> {
    run_checked(clone_dir, "git", &["add", "--all"])?;
    let message = format!("craft: release \"{}\", version \"{}\"", ctx.github_repo, ctx.version);
    run_checked(clone_dir, "git", &["commit", "-m", &message])?;

    if dry_run {
        ctx.reporter.info("[dry-run] would run `git pull --rebase origin master && git push origin master`");
        return Ok(());
    }

    let result = craft_retry::retry_http(
        &craft_retry::HttpRetryConfig::default(),
        |_attempt| -> Result<((), u16), String> {
            let pull = run_command_in_dir("git", &["pull", "--rebase", "origin", "master"], clone_dir)
                .map_err(|e| e.to_string())?;
            if !pull.success {
                return Err(format!("git pull --rebase failed: {}", pull.stderr));
            }
            let push = run_command_in_dir("git", &["push", "origin", "master"], clone_dir).map_err(|e| e.to_string())?;
            if !push.success {
                return Err(format!("git push rejected, likely a concurrent push: {}", push.stderr));
            }
            Ok(((), 200))
        },
        None::<fn()>,
    );

    result.map_err(CraftError::transient)
}

fn run_checked(dir: &Path, program: &str, args: &[&str]) -> Result<(), CraftError> {
    let result = run_command_in_dir(program, args, dir).map_err(|e| CraftError::transient(e.to_string()))?;
    if !result.success {
        return Err(CraftError::transient(format!("{program} {args:?} failed: {}", result.stderr)));
    }
    Ok(())
}
