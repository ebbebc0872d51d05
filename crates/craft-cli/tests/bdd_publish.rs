//! BDD-style (Given/When/Then) tests for the `craft prepare` pipeline
//! (§4.9), exercised end-to-end against a real git repository the way
//! `craft prepare` itself manipulates one.

use std::fs;
use std::path::Path;
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::{TempDir, tempdir};

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

fn write_config(root: &Path, body: &str) {
    write_file(&root.join(".craft.yml"), body);
}

fn git(dir: &Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(output.status.success(), "git {args:?} failed in {}", dir.display());
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn init_repo_with_origin(root: &Path, tracked_files: &[(&str, &str)]) -> TempDir {
    git(root, &["init", "-b", "main"]);
    git(root, &["config", "user.email", "craft-tests@example.invalid"]);
    git(root, &["config", "user.name", "craft tests"]);
    write_file(&root.join("README.md"), "hello\n");
    for (name, content) in tracked_files {
        write_file(&root.join(name), content);
    }
    git(root, &["add", "."]);
    git(root, &["commit", "-m", "chore: initial commit"]);

    let bare = tempdir().expect("bare tempdir");
    git(bare.path(), &["init", "--bare", "-b", "main"]);
    git(root, &["remote", "add", "origin", bare.path().to_str().expect("utf8 path")]);
    git(root, &["push", "origin", "main"]);
    bare
}

fn craft_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("craft"));
    cmd.env_remove("GITHUB_TOKEN").env_remove("GITHUB_API_TOKEN");
    cmd
}

/// Given a repo with a tracked `CHANGELOG.md` and `changelog.policy: auto`,
/// when `prepare --dry-run` runs for version 1.2.3, then the diff it prints
/// contains a new `## 1.2.3` section.
#[test]
fn prepare_dry_run_appends_a_changelog_section_under_auto_policy() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path(), &[("CHANGELOG.md", "# Changelog\n\n")]);
    write_config(
        td.path(),
        "github:\n  owner: getsentry\n  repo: craft\nchangelog:\n  policy: auto\n",
    );

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("1.2.3")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .success()
        .stdout(contains("## 1.2.3"));
}

/// Given `changelog.policy: none` (the default), when `prepare --dry-run`
/// runs, then no changelog section is produced — the policy is respected
/// even though a `CHANGELOG.md` already exists.
#[test]
fn prepare_dry_run_leaves_changelog_untouched_under_none_policy() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path(), &[("CHANGELOG.md", "# Changelog\n\n")]);
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    let out = craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("1.2.3")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert!(!String::from_utf8_lossy(&out).contains("## 1.2.3"));
}

/// Given a `preReleaseCommand` that appends to a tracked file, when
/// `prepare --dry-run` runs, then the diff shows the command's effect —
/// proving it ran inside the isolated worktree, not the caller's checkout.
#[test]
fn prepare_dry_run_runs_the_pre_release_command_in_the_worktree() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path(), &[("NOTES.md", "")]);
    write_config(
        td.path(),
        "github:\n  owner: getsentry\n  repo: craft\npreReleaseCommand: \"echo bumped >> NOTES.md\"\n",
    );

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("2.0.0")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .success()
        .stdout(contains("bumped"));

    // The caller's own NOTES.md was never touched.
    let notes = fs::read_to_string(td.path().join("NOTES.md")).expect("read NOTES.md");
    assert_eq!(notes, "");
}

/// Given a `preReleaseCommand` that exits non-zero, when `prepare` runs,
/// then the command aborts and the worktree is still cleaned up (§4.9: the
/// cleanup step runs regardless of whether the pipeline body succeeded).
#[test]
fn prepare_fails_and_still_cleans_up_when_pre_release_command_fails() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path(), &[]);
    write_config(
        td.path(),
        "github:\n  owner: getsentry\n  repo: craft\npreReleaseCommand: \"exit 1\"\n",
    );

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("1.0.0")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .failure();

    let worktrees = git_output(td.path(), &["worktree", "list"]);
    assert_eq!(worktrees.lines().count(), 1, "stray worktree left behind: {worktrees:?}");
    assert!(!td.path().join(".craft").exists() || fs::read_dir(td.path().join(".craft")).unwrap().next().is_none());
}

/// §8 scenario 1(e): after a successful dry-run, `git worktree list` on the
/// caller's repo returns exactly one line (the main checkout).
#[test]
fn prepare_dry_run_leaves_exactly_one_worktree_behind() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path(), &[]);
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("1.0.0")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .success();

    let worktrees = git_output(td.path(), &["worktree", "list"]);
    assert_eq!(worktrees.lines().count(), 1, "{worktrees:?}");
}

/// Given a dirty working tree, when `prepare` runs without `--dry-run`,
/// then it refuses to start (§4.9 step 1: clean tree required for a live
/// release).
#[test]
fn prepare_live_run_requires_a_clean_working_tree() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path(), &[]);
    write_file(&td.path().join("uncommitted.txt"), "oops\n");
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("1.0.0")
        .arg("--no-input")
        .assert()
        .failure()
        .stderr(contains("clean"));
}
