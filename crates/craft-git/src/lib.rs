//! Git operations for craft: working-tree checks used by the preparation
//! pipeline, and the clone/branch/commit/push primitives the git-repository
//! and release-registry targets build on.
//!
//! # Example
//!
//! ```
//! use craft_git::{GitContext, is_git_clean, get_git_context};
//! use std::path::Path;
//!
//! // Check if the git working tree is clean
//! let clean = is_git_clean(Path::new(".")).unwrap_or(false);
//!
//! // Get git context for audit trail
//! let context = get_git_context(Path::new("."));
//! if let Some(commit) = context.commit {
//!     println!("Current commit: {}", commit);
//! }
//! ```

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Git context information for audit trail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitContext {
    /// Current commit hash
    pub commit: Option<String>,
    /// Current branch name
    pub branch: Option<String>,
    /// Current tag (if on a tag)
    pub tag: Option<String>,
    /// Whether the working tree is dirty
    pub dirty: Option<bool>,
}

impl GitContext {
    /// Create a new empty git context
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if we have commit information
    pub fn has_commit(&self) -> bool {
        self.commit.is_some()
    }

    /// Check if the working tree is dirty
    pub fn is_dirty(&self) -> bool {
        self.dirty.unwrap_or(true)
    }

    /// Get a short commit hash (first 7 characters)
    pub fn short_commit(&self) -> Option<&str> {
        self.commit.as_ref().map(|c| {
            if c.len() > 7 {
                &c[..7]
            } else {
                c.as_str()
            }
        })
    }
}

/// Check if the git working tree is clean (no uncommitted changes)
pub fn is_git_clean(path: &Path) -> Result<bool> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(path)
        .output()
        .context("failed to run git status")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    // If output is empty, the working tree is clean
    Ok(output.stdout.is_empty())
}

/// Check if we're inside a git repository
pub fn is_git_repo(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get the current git commit hash
pub fn get_commit_hash(path: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(path)
        .output()
        .context("failed to run git rev-parse")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git rev-parse failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(hash)
}

/// Get the current branch name
pub fn get_branch(path: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(path)
        .output()
        .context("failed to run git rev-parse")?;

    if !output.status.success() {
        return Ok(None);
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    
    // If we're in detached HEAD state, return None
    if branch == "HEAD" {
        return Ok(None);
    }

    Ok(Some(branch))
}

/// Get the current tag (if on a tag)
pub fn get_tag(path: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["describe", "--exact-match", "--tags"])
        .current_dir(path)
        .output()
        .context("failed to run git describe")?;

    if !output.status.success() {
        return Ok(None);
    }

    let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Some(tag))
}

/// Get complete git context
pub fn get_git_context(path: &Path) -> GitContext {
    let commit = get_commit_hash(path).ok();
    let branch = get_branch(path).ok().flatten();
    let tag = get_tag(path).ok().flatten();
    let dirty = is_git_clean(path).ok().map(|c| !c);

    GitContext {
        commit,
        branch,
        tag,
        dirty,
    }
}

/// Ensure git working tree is clean (returns error if dirty)
pub fn ensure_git_clean(path: &Path) -> Result<()> {
    if !is_git_clean(path)? {
        return Err(anyhow::anyhow!(
            "git working tree has uncommitted changes. Use --allow-dirty to bypass."
        ));
    }
    Ok(())
}

/// Check if a tag exists for the current commit
pub fn has_tag_for_commit(path: &Path) -> bool {
    get_tag(path).ok().flatten().is_some()
}

/// Get the list of changed files (staged + unstaged)
pub fn get_changed_files(path: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(path)
        .output()
        .context("failed to run git status")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let status = String::from_utf8_lossy(&output.stdout);
    let files: Vec<String> = status
        .lines()
        .map(|line| {
            // Format is "XY filename" - extract just the filename
            line.chars().skip(3).collect()
        })
        .collect();

    Ok(files)
}

/// Get remote URL for a given remote name
pub fn get_remote_url(path: &Path, remote: &str) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["remote", "get-url", remote])
        .current_dir(path)
        .output()
        .context("failed to run git remote")?;

    if !output.status.success() {
        return Ok(None);
    }

    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Some(url))
}

/// Check if we're on a specific branch
pub fn is_on_branch(path: &Path, branch_name: &str) -> bool {
    get_branch(path)
        .ok()
        .flatten()
        .map(|b| b == branch_name)
        .unwrap_or(false)
}

/// Check if the current commit is tagged
pub fn is_on_tag(path: &Path) -> bool {
    get_tag(path).ok().flatten().is_some()
}

fn run(path: &Path, args: &[&str], what: &str) -> Result<std::process::Output> {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .with_context(|| format!("failed to spawn git {what}"))?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git {what} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(output)
}

/// Resolve the name of the remote's default branch (`origin/HEAD`), as the
/// preparation pipeline needs before it can branch from it.
pub fn resolve_default_branch(path: &Path) -> Result<String> {
    let output = run(
        path,
        &["symbolic-ref", "refs/remotes/origin/HEAD"],
        "symbolic-ref",
    )?;
    let full = String::from_utf8_lossy(&output.stdout).trim().to_string();
    full.rsplit('/')
        .next()
        .map(str::to_string)
        .context("could not parse origin/HEAD")
}

/// Whether the `origin` remote is configured at all.
pub fn has_origin_remote(path: &Path) -> bool {
    get_remote_url(path, "origin")
        .ok()
        .flatten()
        .is_some()
}

/// Create an isolated worktree at `worktree_path` rooted at `commit_ish`,
/// attached to the same object store as `repo_path`. The preparation
/// pipeline runs every subsequent mutation inside this worktree so the
/// user's own working directory is never touched, live run or dry-run alike.
pub fn add_worktree(repo_path: &Path, worktree_path: &Path, commit_ish: &str) -> Result<()> {
    run(
        repo_path,
        &[
            "worktree",
            "add",
            "--detach",
            worktree_path
                .to_str()
                .context("worktree path is not valid UTF-8")?,
            commit_ish,
        ],
        "worktree add",
    )?;
    Ok(())
}

/// Remove a worktree created with [`add_worktree`]. Best-effort: the
/// directory is force-removed so a crashed pre-release command doesn't
/// prevent cleanup.
pub fn remove_worktree(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    let path_str = worktree_path
        .to_str()
        .context("worktree path is not valid UTF-8")?;
    run(repo_path, &["worktree", "remove", "--force", path_str], "worktree remove")?;
    Ok(())
}

/// Number of lines `git worktree list` reports, used by tests to assert a
/// worktree was actually cleaned up.
pub fn worktree_count(repo_path: &Path) -> Result<usize> {
    let output = run(repo_path, &["worktree", "list"], "worktree list")?;
    Ok(String::from_utf8_lossy(&output.stdout).lines().count())
}

/// Create and check out `branch_name` from the current `HEAD` inside
/// `path` (normally a worktree created by [`add_worktree`]).
pub fn create_branch(path: &Path, branch_name: &str) -> Result<()> {
    run(path, &["checkout", "-b", branch_name], "checkout -b")?;
    Ok(())
}

/// `git clone <url> <dest>`.
pub fn clone(url: &str, dest: &Path) -> Result<()> {
    let dest_str = dest.to_str().context("clone destination is not valid UTF-8")?;
    let output = Command::new("git")
        .args(["clone", url, dest_str])
        .output()
        .context("failed to spawn git clone")?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// `git rm -r .` — used by the git-repository target before untarring a
/// fresh tree into the clone.
pub fn remove_all_tracked(path: &Path) -> Result<()> {
    run(path, &["rm", "-r", "--quiet", "."], "rm -r")?;
    Ok(())
}

/// `git add --all`.
pub fn add_all(path: &Path) -> Result<()> {
    run(path, &["add", "--all"], "add --all")?;
    Ok(())
}

/// Commit whatever is staged. Returns `Ok(false)` without erroring when
/// there is nothing to commit, since a re-run of an idempotent publish may
/// land here with a clean tree.
pub fn commit(path: &Path, message: &str) -> Result<bool> {
    let output = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(path)
        .output()
        .context("failed to spawn git commit")?;
    if output.status.success() {
        return Ok(true);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("nothing to commit") {
        return Ok(false);
    }
    Err(anyhow::anyhow!("git commit failed: {stderr}"))
}

/// `git tag <name>`.
pub fn tag(path: &Path, name: &str) -> Result<()> {
    run(path, &["tag", name], "tag")?;
    Ok(())
}

/// `git push --force origin HEAD:<branch>`.
pub fn push_force(path: &Path, branch: &str) -> Result<()> {
    run(
        path,
        &["push", "--force", "origin", &format!("HEAD:{branch}")],
        "push --force",
    )?;
    Ok(())
}

/// `git push origin --tags`.
pub fn push_tags(path: &Path) -> Result<()> {
    run(path, &["push", "origin", "--tags"], "push --tags")?;
    Ok(())
}

/// `git pull --rebase origin <branch> && git push origin <branch>`, the
/// sequence the release-registry target's shared-clone commit wraps in a
/// retry envelope to tolerate a concurrent push winning the race.
pub fn pull_rebase_and_push(path: &Path, branch: &str) -> Result<()> {
    run(
        path,
        &["pull", "--rebase", "origin", branch],
        "pull --rebase",
    )?;
    run(path, &["push", "origin", branch], "push")?;
    Ok(())
}

/// Unified diff of the worktree against `HEAD`, used by dry-run prepare to
/// show "Here's what would change" without committing.
pub fn diff_against_head(path: &Path) -> Result<String> {
    let output = run(path, &["diff", "HEAD"], "diff")?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Subject lines of every commit reachable from `HEAD` but not from
/// `since_tag` (or every commit if `since_tag` is `None`), oldest first.
/// Feeds the `versioning.policy: auto` conventional-commit scan.
pub fn commit_subjects_since(path: &Path, since_tag: Option<&str>) -> Result<Vec<String>> {
    let range = match since_tag {
        Some(tag) => format!("{tag}..HEAD"),
        None => "HEAD".to_string(),
    };
    let output = run(path, &["log", "--pretty=%s", "--reverse", &range], "log")?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}

/// Most recent tag reachable from `HEAD`, if any — the base the `auto`
/// versioning policy scans commits forward from.
pub fn latest_tag(path: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--abbrev=0"])
        .current_dir(path)
        .output()
        .context("failed to run git describe")?;
    if !output.status.success() {
        return Ok(None);
    }
    let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(if tag.is_empty() { None } else { Some(tag) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use std::process::Command;

    fn init_git_repo(dir: &Path) {
        Command::new("git")
            .args(["init"])
            .current_dir(dir)
            .output()
            .expect("git init");

        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()
            .expect("git config");

        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(dir)
            .output()
            .expect("git config");
    }

    fn make_commit(dir: &Path, msg: &str) {
        Command::new("git")
            .args(["commit", "--allow-empty", "-m", msg])
            .current_dir(dir)
            .output()
            .expect("git commit");
    }

    #[test]
    fn is_git_repo_detects_repo() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());

        assert!(is_git_repo(td.path()));
    }

    #[test]
    fn is_git_repo_returns_false_for_non_repo() {
        let td = tempdir().expect("tempdir");
        assert!(!is_git_repo(td.path()));
    }

    #[test]
    fn is_git_clean_for_empty_repo() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());

        // Empty repo should be clean
        assert!(is_git_clean(td.path()).unwrap_or(false));
    }

    #[test]
    fn get_commit_hash_returns_hash() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        let hash = get_commit_hash(td.path()).expect("commit hash");
        assert_eq!(hash.len(), 40); // SHA-1 hash is 40 hex characters
    }

    #[test]
    fn get_branch_returns_branch() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        // After init, we might be on master or main
        let branch = get_branch(td.path()).expect("branch");
        // Could be "master", "main", or None depending on git version
        assert!(branch.is_none() || branch.as_ref().map_or(false, |b| b == "master" || b == "main"));
    }

    #[test]
    fn get_git_context_populates_fields() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        let context = get_git_context(td.path());

        assert!(context.has_commit());
        assert!(!context.is_dirty()); // Clean working tree
        assert!(context.short_commit().is_some());
    }

    #[test]
    fn git_context_default() {
        let context = GitContext::new();
        assert!(!context.has_commit());
        assert!(context.commit.is_none());
        assert!(context.branch.is_none());
    }

    #[test]
    fn short_commit_truncates() {
        let mut context = GitContext::new();
        context.commit = Some("0123456789abcdef0123456789abcdef01234567".to_string());

        assert_eq!(context.short_commit(), Some("0123456"));
    }

    #[test]
    fn ensure_git_clean_succeeds_when_clean() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        assert!(ensure_git_clean(td.path()).is_ok());
    }

    #[test]
    fn get_changed_files_empty_when_clean() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "test");

        let files = get_changed_files(td.path()).expect("changed files");
        assert!(files.is_empty());
    }

    #[test]
    fn get_remote_url_none_when_no_remote() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());

        let url = get_remote_url(td.path(), "origin").expect("remote url");
        assert!(url.is_none());
    }

    #[test]
    fn worktree_add_and_remove_round_trips() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "initial");

        let worktree_dir = tempdir().expect("worktree tempdir");
        // Remove the auto-created dir so `git worktree add` can create it fresh.
        std::fs::remove_dir(worktree_dir.path()).ok();

        add_worktree(td.path(), worktree_dir.path(), "HEAD").expect("add worktree");
        assert_eq!(worktree_count(td.path()).unwrap(), 2);

        remove_worktree(td.path(), worktree_dir.path()).expect("remove worktree");
        assert_eq!(worktree_count(td.path()).unwrap(), 1);
    }

    #[test]
    fn create_branch_checks_out_new_branch() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "initial");

        create_branch(td.path(), "release/1.0.1").expect("create branch");
        assert_eq!(get_branch(td.path()).unwrap().as_deref(), Some("release/1.0.1"));
    }

    #[test]
    fn commit_returns_false_when_nothing_staged() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "initial");

        assert!(!commit(td.path(), "release: nothing changed").unwrap());
    }

    #[test]
    fn diff_against_head_reports_unstaged_changes() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        std::fs::write(td.path().join("CHANGELOG.md"), "initial\n").unwrap();
        run(td.path(), &["add", "."], "add").unwrap();
        make_commit(td.path(), "initial");

        std::fs::write(td.path().join("CHANGELOG.md"), "initial\nmore\n").unwrap();
        run(td.path(), &["add", "."], "add").unwrap();

        let diff = diff_against_head(td.path()).expect("diff");
        assert!(diff.contains("CHANGELOG.md"));
    }

    #[test]
    fn commit_subjects_since_none_returns_every_commit_oldest_first() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "feat: first");
        make_commit(td.path(), "fix: second");

        let subjects = commit_subjects_since(td.path(), None).expect("log");
        assert_eq!(subjects, vec!["feat: first".to_string(), "fix: second".to_string()]);
    }

    #[test]
    fn commit_subjects_since_tag_excludes_earlier_commits() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "chore: before tag");
        tag(td.path(), "1.0.0").expect("tag");
        make_commit(td.path(), "feat: after tag");

        let subjects = commit_subjects_since(td.path(), Some("1.0.0")).expect("log");
        assert_eq!(subjects, vec!["feat: after tag".to_string()]);
    }

    #[test]
    fn latest_tag_returns_none_without_any_tag() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "initial");

        assert_eq!(latest_tag(td.path()).unwrap(), None);
    }

    #[test]
    fn latest_tag_returns_most_recent_tag() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "initial");
        tag(td.path(), "1.0.0").expect("tag");

        assert_eq!(latest_tag(td.path()).unwrap(), Some("1.0.0".to_string()));
    }
}