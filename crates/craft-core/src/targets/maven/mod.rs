//! Maven/Sonatype target (§4.6): decomposes each downloaded artifact zip
//! into one or more modules (`dist`), deploys every module with
//! `gpg:sign-and-deploy-file`, and drives the staging-repository lifecycle
//! (`staging`) around the whole batch.

pub mod dist;
pub mod http_client;
pub mod staging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use craft_types::{CraftError, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::default_filter;
use dist::{plan_module, package_name_from_zip, ModuleKind};
use staging::{DeploymentState, SonatypeClient, StagingRepository};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MavenConfig {
    pub server_url: String,
    #[serde(default = "default_auto_drop")]
    pub auto_drop_after_release: bool,
}

fn default_auto_drop() -> bool {
    true
}

/// The network surface this target drives beyond the staging lifecycle:
/// Central's idempotence check and the actual `gpg:sign-and-deploy-file`
/// invocation, abstracted so tests inject a fake instead of shelling out
/// and making HTTP calls.
pub trait MavenClient: SonatypeClient {
    /// `GET .../publisher/published?namespace=...&name=...&version=...`
    fn is_already_published(&self, package_name: &str, version: &str) -> Result<bool, CraftError>;

    /// Run `mvn gpg:sign-and-deploy-file` for one module's artifact set.
    /// `files`/`classifiers`/`types` are parallel, equal-length vectors of
    /// side artifacts; `primary` is absent for a BOM deploy.
    fn sign_and_deploy(&self, plan: &SignAndDeployRequest) -> Result<(), CraftError>;
}

pub struct SignAndDeployRequest<'a> {
    pub pom: &'a Path,
    pub primary: Option<&'a Path>,
    pub files: &'a [PathBuf],
    pub classifiers: &'a [String],
    pub types: &'a [String],
    pub repository_id: &'a str,
    pub url: &'a str,
}

pub struct MavenTarget<C: MavenClient> {
    pub config: MavenConfig,
    pub client: C,
}

impl<C: MavenClient> MavenTarget<C> {
    pub fn new(config: MavenConfig, client: C) -> Self {
        Self { config, client }
    }
}

/// Import a scoped GPG private key for the duration of the publish, then
/// remove it. A no-op if `GPG_PRIVATE_KEY` isn't set, mirroring how other
/// targets treat their credential env var as optional until `publish` needs
/// it.
struct GpgKeyScope {
    key_id: Option<String>,
}

impl GpgKeyScope {
    fn import() -> Result<Self, CraftError> {
        let Ok(key) = std::env::var("GPG_PRIVATE_KEY") else {
            return Ok(Self { key_id: None });
        };
        let mut child = std::process::Command::new("gpg")
            .args(["--batch", "--import"])
            .env("GNUPGHOME", gnupg_home())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| CraftError::transient(format!("failed to spawn gpg: {e}")))?;
        {
            use std::io::Write;
            let stdin = child.stdin.as_mut().ok_or_else(|| CraftError::transient("gpg stdin unavailable"))?;
            stdin.write_all(key.as_bytes()).map_err(|e| CraftError::transient(e.to_string()))?;
        }
        let output = child.wait_with_output().map_err(|e| CraftError::transient(e.to_string()))?;
        if !output.status.success() {
            return Err(CraftError::transient(format!(
                "gpg --import failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let key_id = stderr
            .lines()
            .find_map(|line| line.split("key ").nth(1))
            .and_then(|rest| rest.split(':').next())
            .map(|s| s.to_string());
        Ok(Self { key_id })
    }
}

impl Drop for GpgKeyScope {
    fn drop(&mut self) {
        if let Some(id) = &self.key_id {
            let _ = craft_process::run_command("gpg", &["--batch", "--yes", "--delete-secret-and-public-key", id]);
        }
    }
}

fn gnupg_home() -> String {
    std::env::var("GNUPGHOME").unwrap_or_else(|_| "~/.gnupg".to_string())
}

impl<C: MavenClient> Target for MavenTarget<C> {
    fn name(&self) -> &'static str {
        "maven"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_filter("*.zip");
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        if artifacts.is_empty() {
            ctx.reporter.info("no maven deploy zips matched for this revision, nothing to release");
            return Ok(());
        }

        let staging = StagingRepository::new(&self.client);
        let repo = staging.get_repository()?;

        let _gpg = if ctx.dry_run { None } else { Some(GpgKeyScope::import()?) };

        let mut any_deployed = false;
        for artifact in &artifacts {
            let package_name = package_name_from_zip(&artifact.filename, &ctx.version.to_string());
            if self.client.is_already_published(&package_name, &ctx.version.to_string())? {
                ctx.reporter.info(&format!("{package_name} {} already published on Central, skipping", ctx.version));
                continue;
            }

            if ctx.dry_run {
                ctx.reporter.info(&format!("[dry-run] would deploy {package_name} {} via staging repo {}", ctx.version, repo.repository_id));
                continue;
            }

            let local_zip = ctx.artifacts.download_artifact(artifact, None)?;
            let extract_dir = tempfile::tempdir().map_err(|e| CraftError::transient(e.to_string()))?;
            extract_zip(&local_zip, extract_dir.path())?;

            for module_dir in list_module_dirs(extract_dir.path())? {
                let plan = plan_module(&module_dir)?;
                deploy_module(&self.client, &plan, &repo.repository_id, &self.config.server_url)?;
            }
            any_deployed = true;
            ctx.reporter.info(&format!("deployed {package_name} {} to staging repo {}", ctx.version, repo.repository_id));
        }

        if ctx.dry_run {
            ctx.reporter.info("[dry-run] would close and release the staging repository");
            return Ok(());
        }

        if !any_deployed {
            ctx.reporter.info("every maven artifact was already published, skipping staging close/release");
            return Ok(());
        }

        staging.close_and_release_repository(&repo)?;
        ctx.reporter.info(&format!("released staging repo {} for version {}", repo.repository_id, ctx.version));
        Ok(())
    }

    fn bump_version(&self, _root_dir: &Path, _version: &Version) -> anyhow::Result<bool> {
        Ok(false)
    }
}

fn deploy_module(client: &impl MavenClient, plan: &dist::DeployPlan, repository_id: &str, url: &str) -> Result<(), CraftError> {
    let primary = if plan.kind == ModuleKind::Bom { None } else { plan.primary.as_deref() };
    let request = SignAndDeployRequest {
        pom: &plan.pom,
        primary,
        files: &plan.files,
        classifiers: &plan.classifiers,
        types: &plan.types,
        repository_id,
        url,
    };
    let result = craft_retry::retry_spawn_process(
        |_attempt| client.sign_and_deploy(&request).map_err(|e| e.to_string()),
        |_err: &String| true,
    );
    result.map_err(CraftError::transient)
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), CraftError> {
    let result = craft_process::run_command("unzip", &["-o", &zip_path.display().to_string(), "-d", &dest.display().to_string()])
        .map_err(|e| CraftError::transient(e.to_string()))?;
    if !result.success {
        return Err(CraftError::transient(format!("unzip failed: {}", result.stderr)));
    }
    Ok(())
}

/// Every immediate subdirectory of an extracted deploy zip is one module.
fn list_module_dirs(root: &Path) -> Result<Vec<PathBuf>, CraftError> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .map_err(|e| CraftError::transient(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use craft_types::{ArtifactNameFilter, ChecksumSpec, NexusRepository, NexusRepositoryState, Revision};
    use std::sync::Mutex;

    struct FakeMavenClient {
        published: Mutex<Vec<String>>,
        deployed: Mutex<Vec<String>>,
        repo: NexusRepository,
    }

    impl SonatypeClient for FakeMavenClient {
        fn search_repositories(&self) -> Result<Vec<NexusRepository>, CraftError> {
            Ok(vec![self.repo.clone()])
        }
        fn close_repository(&self, _id: &str) -> Result<(), CraftError> {
            Ok(())
        }
        fn promote_repository(&self, _id: &str) -> Result<(), CraftError> {
            Ok(())
        }
        fn deployment_status(&self, _deployment_id: &str) -> Result<DeploymentState, CraftError> {
            Ok(DeploymentState::Published)
        }
        fn sleep(&self, _duration: Duration) {}
    }

    impl MavenClient for FakeMavenClient {
        fn is_already_published(&self, package_name: &str, _version: &str) -> Result<bool, CraftError> {
            Ok(self.published.lock().unwrap().contains(&package_name.to_string()))
        }
        fn sign_and_deploy(&self, plan: &SignAndDeployRequest) -> Result<(), CraftError> {
            self.deployed.lock().unwrap().push(plan.pom.display().to_string());
            Ok(())
        }
    }

    struct NoArtifactsProvider;
    impl crate::artifact_provider::ArtifactProvider for NoArtifactsProvider {
        fn filter_artifacts_for_revision(&self, _revision: &Revision, _filter: &ArtifactNameFilter) -> Result<Vec<craft_types::RemoteArtifact>, CraftError> {
            Ok(vec![])
        }
        fn download_artifact(&self, _artifact: &craft_types::RemoteArtifact, _dst_dir: Option<&Path>) -> Result<PathBuf, CraftError> {
            unreachable!()
        }
        fn get_checksum(&self, _artifact: &craft_types::RemoteArtifact, _spec: ChecksumSpec) -> Result<String, CraftError> {
            unreachable!()
        }
    }

    #[test]
    fn publish_is_a_no_op_when_no_artifacts_match() {
        use crate::reporter::NullReporter;
        use std::sync::Arc;

        let client = FakeMavenClient {
            published: Mutex::new(vec![]),
            deployed: Mutex::new(vec![]),
            repo: NexusRepository { repository_id: "repo-1".to_string(), state: NexusRepositoryState::Open, deployment_id: "dep-1".to_string() },
        };
        let target = MavenTarget::new(MavenConfig { server_url: "https://example.invalid".to_string(), auto_drop_after_release: true }, client);

        let mut reporter = NullReporter;
        let revision = Revision::parse("a".repeat(40)).unwrap();
        let version = Version::parse("1.0.0").unwrap();
        let mut ctx = PublishCtx {
            version: &version,
            revision: &revision,
            github_owner: "acme",
            github_repo: "demo",
            dry_run: false,
            artifacts: Arc::new(NoArtifactsProvider),
            reporter: &mut reporter,
        };
        target.publish(&mut ctx).unwrap();
        assert!(target.client.deployed.lock().unwrap().is_empty());
    }
}
