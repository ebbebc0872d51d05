//! Preparation pipeline (§4.9): bumps versions in detected manifest files,
//! runs the configured pre-release command inside an isolated workspace,
//! diffs or commits the result, and pushes a `release/<version>` branch.
//!
//! Every mutation after step 2 happens inside a git worktree
//! ([`craft_git::add_worktree`]) attached to the caller's repository, never
//! in the caller's own working directory — dry-run and live runs share
//! exactly the same code path up through the diff; only the final
//! commit/push step diverges (§4.9 step 6-7).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use craft_config::{Config, Policy};
use craft_types::Version;

use crate::factory;
use crate::reporter::Reporter;
use crate::target::{Target, default_priority};

/// Outcome of one `craft prepare` invocation.
#[derive(Debug, Clone)]
pub struct PrepareReport {
    pub version: Version,
    pub branch: String,
    /// Populated only in `--dry-run`: the unified diff of everything the
    /// pipeline would have committed.
    pub dry_run_diff: Option<String>,
}

/// Derive the next version from conventional-commit subjects since the last
/// tag, per `versioning.policy: auto` (§4.9 step 0, §9 glossary "Preview
/// version" notwithstanding — this only ever proposes a release version).
///
/// A commit whose subject contains `!` right before the `:` (`feat!:`,
/// `fix(api)!:`) or whose body/footer is unavailable here (subjects only) is
/// treated as a major bump when the subject itself carries the `!` marker;
/// full `BREAKING CHANGE:` footer scanning would require full commit bodies,
/// which is out of scope for the subject-only heuristic this pipeline uses.
/// `feat:` bumps minor, `fix:` bumps patch; everything else is ignored. If
/// no commit matches any of these prefixes, the current version is returned
/// unchanged — the caller decides whether that is an error.
pub fn auto_bump_version(current: &Version, commit_subjects: &[String]) -> Version {
    #[derive(PartialEq, PartialOrd)]
    enum Bump {
        None,
        Patch,
        Minor,
        Major,
    }

    let mut bump = Bump::None;
    for subject in commit_subjects {
        let Some(colon) = subject.find(':') else {
            continue;
        };
        let prefix = &subject[..colon];
        let (kind, breaking) = match prefix.split_once('!') {
            Some((kind, "")) => (kind, true),
            _ => (prefix, false),
        };
        let kind = kind.split('(').next().unwrap_or(kind);
        let this_bump = if breaking {
            Bump::Major
        } else {
            match kind {
                "feat" => Bump::Minor,
                "fix" => Bump::Patch,
                _ => Bump::None,
            }
        };
        if this_bump > bump {
            bump = this_bump;
        }
    }

    match bump {
        Bump::None => current.clone(),
        Bump::Patch => Version {
            major: current.major,
            minor: current.minor,
            patch: current.patch + 1,
            pre: None,
            build: None,
        },
        Bump::Minor => Version {
            major: current.major,
            minor: current.minor + 1,
            patch: 0,
            pre: None,
            build: None,
        },
        Bump::Major => Version {
            major: current.major + 1,
            minor: 0,
            patch: 0,
            pre: None,
            build: None,
        },
    }
}

/// Resolve the version `craft prepare` should release: the explicit
/// command-line version if given, else derived from conventional-commit
/// history when `versioning.policy == auto` (§4.9 step 0, §8 scenario 2).
pub fn resolve_version(config: &Config, repo_root: &Path, explicit: Option<&str>) -> Result<Version> {
    if let Some(v) = explicit {
        let version = Version::parse(v).with_context(|| format!("invalid version {v:?}"))?;
        config.check_min_version(&version)?;
        return Ok(version);
    }

    if config.versioning.policy != Policy::Auto {
        bail!("no version given and versioning.policy is not \"auto\"");
    }

    let last_tag = craft_git::latest_tag(repo_root)?;
    let current = match &last_tag {
        Some(tag) => Version::parse(tag.trim_start_matches('v'))
            .with_context(|| format!("latest tag {tag:?} is not a valid version"))?,
        None => Version {
            major: 0,
            minor: 0,
            patch: 0,
            pre: None,
            build: None,
        },
    };
    let subjects = craft_git::commit_subjects_since(repo_root, last_tag.as_deref())?;
    let next = auto_bump_version(&current, &subjects);
    if next == current {
        bail!("no feat:/fix: commits since {last_tag:?}; nothing to release");
    }
    config.check_min_version(&next)?;
    Ok(next)
}

/// Options the CLI's `craft prepare` subcommand gathers from its flags.
pub struct PrepareOptions<'a> {
    pub repo_root: &'a Path,
    pub version: Version,
    pub dry_run: bool,
    pub no_input: bool,
}

fn worktree_dir_name(dry_run: bool, disambiguator: &str) -> String {
    if dry_run {
        format!("craft-dry-run-{disambiguator}")
    } else {
        format!("craft-release-{disambiguator}")
    }
}

/// Run the full preparation pipeline. `disambiguator` replaces the
/// reference implementation's random suffix so this function stays
/// deterministic and testable; callers pass a real random token in
/// production (the CLI uses a process id + nanosecond timestamp).
pub fn prepare(
    config: &Config,
    opts: &PrepareOptions<'_>,
    disambiguator: &str,
    reporter: &mut dyn Reporter,
) -> Result<PrepareReport> {
    if !opts.dry_run {
        craft_git::ensure_git_clean(opts.repo_root).context("working tree must be clean to prepare a release")?;
    }
    if !craft_git::has_origin_remote(opts.repo_root) {
        bail!("no \"origin\" remote configured");
    }
    let default_branch = craft_git::resolve_default_branch(opts.repo_root).context("resolving default branch")?;
    reporter.info(&format!("default branch is {default_branch}"));

    let worktree_dir = opts.repo_root.join(".craft").join(worktree_dir_name(opts.dry_run, disambiguator));
    if let Some(parent) = worktree_dir.parent() {
        std::fs::create_dir_all(parent).context("creating .craft scratch directory")?;
    }

    let release_branch = format!("release/{}", opts.version);
    reporter.info(&format!("creating isolated worktree at {}", worktree_dir.display()));
    craft_git::add_worktree(opts.repo_root, &worktree_dir, "HEAD").context("creating release worktree")?;

    let result = run_in_worktree(config, opts, &worktree_dir, &release_branch, reporter);

    reporter.info("cleaning up release worktree");
    if let Err(e) = craft_git::remove_worktree(opts.repo_root, &worktree_dir) {
        reporter.warn(&format!("failed to remove worktree {}: {e}", worktree_dir.display()));
    }

    result
}

fn run_in_worktree(
    config: &Config,
    opts: &PrepareOptions<'_>,
    worktree_dir: &Path,
    release_branch: &str,
    reporter: &mut dyn Reporter,
) -> Result<PrepareReport> {
    craft_git::create_branch(worktree_dir, release_branch)
        .with_context(|| format!("creating branch {release_branch}"))?;
    reporter.info(&format!("created branch {release_branch}"));

    update_changelog(config, worktree_dir, &opts.version)?;

    apply_version_bumps(config, worktree_dir, &opts.version, reporter)?;

    if let Some(command) = &config.pre_release_command {
        run_pre_release_command(command, worktree_dir, opts)?;
    }

    if opts.dry_run {
        let diff = craft_git::diff_against_head(worktree_dir).context("diffing worktree against HEAD")?;
        reporter.info("Here's what would change:");
        reporter.info(&diff);
        reporter.info(&format!(
            "[dry-run] Would execute git.push origin HEAD:{release_branch}"
        ));
        return Ok(PrepareReport {
            version: opts.version.clone(),
            branch: release_branch.to_string(),
            dry_run_diff: Some(diff),
        });
    }

    craft_git::add_all(worktree_dir).context("staging release changes")?;
    craft_git::commit(worktree_dir, &format!("release: {}", opts.version)).context("committing release changes")?;
    craft_git::push_force(worktree_dir, release_branch).context("pushing release branch")?;

    Ok(PrepareReport {
        version: opts.version.clone(),
        branch: release_branch.to_string(),
        dry_run_diff: None,
    })
}

/// §4.9 step 4: `none` leaves the file untouched, `simple` is a no-op beyond
/// what `auto` does (both policies funnel through the same append here since
/// this pipeline only tracks a flat changelog, not per-section entries),
/// `auto` creates the file if it's missing so there is always something to
/// append to on the *next* release.
fn update_changelog(config: &Config, worktree_dir: &Path, version: &Version) -> Result<()> {
    if config.changelog.policy == Policy::None {
        return Ok(());
    }
    let path = worktree_dir.join(&config.changelog.path);
    if !path.exists() {
        if config.changelog.policy == Policy::Auto {
            std::fs::write(&path, "# Changelog\n\n").context("creating CHANGELOG.md")?;
        } else {
            return Ok(());
        }
    }
    let existing = std::fs::read_to_string(&path).context("reading changelog")?;
    if existing.contains(&format!("## {version}")) {
        return Ok(());
    }
    let (header, rest) = existing.split_once("\n\n").unwrap_or((existing.as_str(), ""));
    let updated = format!("{header}\n\n## {version}\n\n{rest}");
    std::fs::write(&path, updated).context("writing changelog")?;
    Ok(())
}

/// §4.9 step 5: apply every configured target's `bump_version`, in priority
/// order, de-duplicated by target kind. Wraps each failure with the
/// documented message shape.
fn apply_version_bumps(
    config: &Config,
    worktree_dir: &Path,
    version: &Version,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let manifest_path = worktree_dir.join("Cargo.toml");

    let mut seen = std::collections::HashSet::new();
    let mut ordered: Vec<&craft_types::TargetConfig> = config
        .targets
        .iter()
        .filter(|t| factory::BUMP_CAPABLE_TARGET_KINDS.contains(&t.name.as_str()))
        .filter(|t| seen.insert(t.name.clone()))
        .collect();
    ordered.sort_by_key(|t| default_priority(&t.name));

    for target_config in ordered {
        let target = factory::build_bump_target(target_config, &manifest_path)
            .with_context(|| format!("Automatic version bump failed for \"{}\" target", target_config.name))?;
        let changed = bump_one(target.as_ref(), worktree_dir, version)
            .with_context(|| format!("Automatic version bump failed for \"{}\" target", target_config.name))?;
        if changed {
            reporter.info(&format!("bumped version files for {}", target_config.name));
        } else {
            reporter.info(&format!("no version files changed for {}", target_config.name));
        }
    }
    Ok(())
}

fn bump_one(target: &dyn Target, worktree_dir: &Path, version: &Version) -> Result<bool> {
    target.bump_version(worktree_dir, version)
}

fn run_pre_release_command(command: &str, worktree_dir: &Path, opts: &PrepareOptions<'_>) -> Result<()> {
    let previous = craft_git::latest_tag(opts.repo_root)?.unwrap_or_else(|| "0.0.0".to_string());
    let result = craft_process::run_command_in_dir(
        "sh",
        &["-c", command, "sh", &previous, &opts.version.to_string()],
        worktree_dir,
    )
    .context("running preReleaseCommand")?;
    result.ok().context("preReleaseCommand exited non-zero")?;
    Ok(())
}

/// Directory `resolve_default_branch`'s name keeps this module honest during
/// tests: every worktree it creates lives under `.craft/` so a stray run
/// never collides with a user's own top-level directories.
pub fn worktree_scratch_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".craft")
}
