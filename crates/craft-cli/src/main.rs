use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use craft_config::Config;
use craft_core::artifact_provider::CiArtifactProvider;
use craft_core::factory;
use craft_core::github::GithubClient;
use craft_core::orchestrator::PublishOrchestrator;
use craft_core::prepare::{self, PrepareOptions};
use craft_core::reporter::Reporter;
use craft_core::status_provider::{CiStatusProvider, StatusProvider};
use craft_types::{ReleaseContext, Revision, Version};

mod progress;

#[derive(Parser, Debug)]
#[command(name = "craft", version)]
#[command(about = "Release-automation engine: drives a software release from a tagged revision out to a project's configured package registries.")]
struct Cli {
    /// Project root containing `.craft.yml` (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bump version files, run the pre-release command, and open a release branch.
    Prepare {
        /// Version to release. Omit when `versioning.policy: auto` is configured.
        version: Option<String>,

        /// Diff the release commit instead of pushing it.
        #[arg(long)]
        dry_run: bool,

        /// Never prompt; fail instead of asking for confirmation.
        #[arg(long)]
        no_input: bool,
    },
    /// Publish a tagged revision's artifacts to every configured target (or a selected subset).
    Publish {
        /// Version being published. Must match a tag already pushed to `github.{owner,repo}`.
        version: String,

        /// Restrict the run to these target names (repeatable). Omit to run every configured target.
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Revision to publish artifacts for (defaults to the current `HEAD`).
        #[arg(long)]
        rev: Option<String>,

        /// Log what each target would do without uploading anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective `.craft.yml` as JSON, validating every target kind along the way.
    Config,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    match cli.cmd {
        Commands::Config => run_config(&cli.root),
        Commands::Prepare {
            version,
            dry_run,
            no_input,
        } => run_prepare(&cli.root, version.as_deref(), dry_run, no_input, &mut reporter),
        Commands::Publish {
            version,
            targets,
            rev,
            dry_run,
        } => run_publish(&cli.root, &version, &targets, rev.as_deref(), dry_run, &mut reporter),
    }
}

fn load_config(root: &Path) -> Result<Config> {
    Config::load(root).with_context(|| {
        format!(
            "loading {} from {}",
            craft_config::CONFIG_FILE,
            root.display()
        )
    })
}

/// `craft config`: parses `.craft.yml`, rejects an unknown target kind the
/// same way `craft publish` eventually would, and prints the document back
/// as JSON so operators and CI steps can pipe it into `jq`.
fn run_config(root: &Path) -> Result<()> {
    let config = load_config(root)?;
    for target in &config.targets {
        if !factory::is_known_kind(&target.name) {
            bail!("unknown target kind {:?} in {}", target.name, craft_config::CONFIG_FILE);
        }
    }
    println!("{}", config.to_json()?);
    Ok(())
}

fn run_prepare(
    root: &Path,
    version: Option<&str>,
    dry_run: bool,
    no_input: bool,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let config = load_config(root)?;
    let version = prepare::resolve_version(&config, root, version)?;
    reporter.info(&format!("Releasing version {version}"));

    warn_if_revision_not_green(&config, root, reporter);

    let disambiguator = format!(
        "{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let opts = PrepareOptions {
        repo_root: root,
        version,
        dry_run,
        no_input,
    };
    let report = prepare::prepare(&config, &opts, &disambiguator, reporter)?;

    println!("branch: {}", report.branch);
    match &report.dry_run_diff {
        Some(diff) if diff.trim().is_empty() => println!("(no changes)"),
        Some(_) => {}
        None => println!("pushed release/{} to origin", report.version),
    }
    Ok(())
}

/// Best-effort: warns if the current revision's combined CI status is not a
/// clean success, but never blocks `prepare` on it (no `GITHUB_TOKEN` means
/// skip the check silently rather than fail a release over a missing
/// credential this command doesn't otherwise need).
fn warn_if_revision_not_green(config: &Config, root: &Path, reporter: &mut dyn Reporter) {
    let Some(token) = craft_auth::github_token() else {
        return;
    };
    let Ok(sha) = craft_git::get_commit_hash(root) else {
        return;
    };
    let Ok(revision) = Revision::parse(sha) else {
        return;
    };

    let client = GithubClient::new(config.github.owner.clone(), config.github.repo.clone(), Some(token));
    let provider = CiStatusProvider::new(
        client,
        Vec::new(),
        "github.com".to_string(),
        config.github.owner.clone(),
        config.github.repo.clone(),
    );
    match provider.get_revision_status(&revision) {
        Ok(craft_types::RevisionStatus::Success) | Err(_) => {}
        Ok(status) => reporter.warn(&format!("revision {} has CI status {status:?}", revision.as_str())),
    }
}

fn run_publish(
    root: &Path,
    version: &str,
    target_filter: &[String],
    rev: Option<&str>,
    dry_run: bool,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let config = load_config(root)?;
    let version = Version::parse(version).with_context(|| format!("invalid version {version:?}"))?;
    config.check_min_version(&version)?;

    let revision = match rev {
        Some(r) => Revision::parse(r)?,
        None => Revision::parse(craft_git::get_commit_hash(root)?)?,
    };

    let ctx = ReleaseContext {
        version,
        revision,
        github_owner: config.github.owner.clone(),
        github_repo: config.github.repo.clone(),
        dry_run,
        targets: config.targets.clone(),
    };

    let token = craft_auth::github_token();
    let ci_client = GithubClient::new(config.github.owner.clone(), config.github.repo.clone(), token);
    let download_dir = root.join(".craft").join("artifacts");
    std::fs::create_dir_all(&download_dir).context("creating artifact download directory")?;
    let artifacts = Arc::new(CiArtifactProvider::new(ci_client, Vec::new(), download_dir));

    let manifest_path = root.join("Cargo.toml");
    let registry_repo_url = "https://github.com/getsentry/sentry-release-registry.git".to_string();
    let orchestrator = PublishOrchestrator::new(manifest_path, registry_repo_url);

    let selected = if target_filter.is_empty() {
        None
    } else {
        Some(target_filter)
    };
    let target_count = selected.map_or(ctx.targets.len(), <[String]>::len);
    let progress = progress::ProgressReporter::new(target_count);
    progress.set_status("publishing");
    let report = orchestrator.publish(&ctx, artifacts, selected, reporter)?;
    progress.finish();

    for result in &report.results {
        let label = match &result.id {
            Some(id) => format!("{} ({id})", result.name),
            None => result.name.clone(),
        };
        println!("{label}: {:?}", result.outcome);
    }

    if !report.all_succeeded() {
        bail!("one or more targets failed to publish");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::tempdir;

    #[derive(Default)]
    struct TestReporter {
        infos: Vec<String>,
        warns: Vec<String>,
    }

    impl Reporter for TestReporter {
        fn info(&mut self, msg: &str) {
            self.infos.push(msg.to_string());
        }
        fn warn(&mut self, msg: &str) {
            self.warns.push(msg.to_string());
        }
        fn error(&mut self, _msg: &str) {}
    }

    fn write_config(root: &Path, body: &str) {
        fs::write(root.join(craft_config::CONFIG_FILE), body).expect("write config");
    }

    #[test]
    fn run_config_rejects_unknown_target_kind() {
        let td = tempdir().expect("tempdir");
        write_config(
            td.path(),
            "github:\n  owner: getsentry\n  repo: craft\ntargets:\n  - name: not-a-real-target\n",
        );
        let err = run_config(td.path()).unwrap_err();
        assert!(err.to_string().contains("unknown target kind"));
    }

    #[test]
    fn run_config_accepts_known_target_kinds() {
        let td = tempdir().expect("tempdir");
        write_config(
            td.path(),
            "github:\n  owner: getsentry\n  repo: craft\ntargets:\n  - name: crates\n",
        );
        assert!(run_config(td.path()).is_ok());
    }

    #[test]
    fn run_publish_rejects_invalid_version() {
        let td = tempdir().expect("tempdir");
        write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");
        let mut reporter = TestReporter::default();
        let err = run_publish(td.path(), "not-a-version", &[], Some("1b843f2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaab38"), false, &mut reporter)
            .unwrap_err();
        assert!(err.to_string().contains("invalid version"));
    }

    #[test]
    fn run_publish_rejects_version_below_min_version() {
        let td = tempdir().expect("tempdir");
        write_config(
            td.path(),
            "minVersion: 2.0.0\ngithub:\n  owner: getsentry\n  repo: craft\n",
        );
        let mut reporter = TestReporter::default();
        let err = run_publish(td.path(), "1.0.0", &[], Some("1b843f2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaab38"), false, &mut reporter)
            .unwrap_err();
        assert!(err.to_string().contains("minVersion"));
    }

    #[test]
    fn run_publish_rejects_malformed_revision() {
        let td = tempdir().expect("tempdir");
        write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");
        let mut reporter = TestReporter::default();
        let err = run_publish(td.path(), "1.0.0", &[], Some("not-a-sha"), false, &mut reporter).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("revision") || err.to_string().contains("sha"));
    }

    #[test]
    fn warn_if_revision_not_green_is_silent_without_a_token() {
        let td = tempdir().expect("tempdir");
        write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");
        let config = load_config(td.path()).expect("config");
        temp_env::with_vars_unset(["GITHUB_TOKEN", "GITHUB_API_TOKEN"], || {
            let mut reporter = TestReporter::default();
            warn_if_revision_not_green(&config, td.path(), &mut reporter);
            assert!(reporter.warns.is_empty());
        });
    }

    #[test]
    fn cli_reporter_methods_are_callable() {
        let mut rep = CliReporter;
        rep.info("info");
        rep.warn("warn");
        rep.error("error");
    }

    #[test]
    fn print_cmd_version_reports_missing_command() {
        let out = Command::new("definitely-not-a-real-command-craft").arg("--version").output();
        assert!(out.is_err() || !out.unwrap().status.success());
    }
}
