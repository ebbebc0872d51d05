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

fn init_repo(root: &Path) {
    git(root, &["init", "-b", "main"]);
    git(root, &["config", "user.email", "craft-tests@example.invalid"]);
    git(root, &["config", "user.name", "craft tests"]);
    write_file(&root.join("README.md"), "hello\n");
    git(root, &["add", "."]);
    git(root, &["commit", "-m", "chore: initial commit"]);
}

/// Sets up `root` as a git repo with a real bare "origin" remote, the way
/// `craft prepare` requires (§4.9 step 1). Returns the bare repo's tempdir
/// so it stays alive for the test's duration.
fn init_repo_with_origin(root: &Path) -> TempDir {
    init_repo(root);
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

#[test]
fn config_command_prints_effective_config_as_json() {
    let td = tempdir().expect("tempdir");
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    let out = craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("config")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(out).expect("utf8");
    assert!(stdout.contains("\"owner\": \"getsentry\""));
    assert!(stdout.contains("\"repo\": \"craft\""));
}

#[test]
fn config_command_rejects_unknown_target_kind() {
    let td = tempdir().expect("tempdir");
    write_config(
        td.path(),
        "github:\n  owner: getsentry\n  repo: craft\ntargets:\n  - name: not-a-real-target\n",
    );

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(contains("unknown target kind"));
}

/// §8 scenario 1 (dry-run prepare): an explicit version opens
/// `release/<version>` inside an isolated worktree and never touches the
/// caller's own working directory.
#[test]
fn prepare_dry_run_with_explicit_version_opens_release_branch() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path());
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("1.2.3")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .success()
        .stdout(contains("branch: release/1.2.3"));

    // The caller's own checkout stays on main, untouched.
    let branch = StdCommand::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(td.path())
        .output()
        .expect("git rev-parse");
    assert_eq!(String::from_utf8_lossy(&branch.stdout).trim(), "main");
}

/// §8 scenario 2 (auto version): one `feat:` commit since the last tag
/// bumps the minor version under `versioning.policy: auto`.
#[test]
fn prepare_auto_policy_derives_version_from_conventional_commits() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path());
    git(td.path(), &["tag", "1.0.0"]);
    write_file(&td.path().join("feature.txt"), "new feature\n");
    git(td.path(), &["add", "."]);
    git(td.path(), &["commit", "-m", "feat: add a thing"]);
    write_config(
        td.path(),
        "github:\n  owner: getsentry\n  repo: craft\nversioning:\n  policy: auto\n",
    );

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .success()
        .stdout(contains("branch: release/1.1.0"));
}

#[test]
fn prepare_without_origin_remote_fails() {
    let td = tempdir().expect("tempdir");
    init_repo(td.path());
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("1.0.0")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .failure()
        .stderr(contains("origin"));
}

#[test]
fn prepare_without_a_version_or_auto_policy_fails() {
    let td = tempdir().expect("tempdir");
    let _origin = init_repo_with_origin(td.path());
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("prepare")
        .arg("--dry-run")
        .arg("--no-input")
        .assert()
        .failure()
        .stderr(contains("auto"));
}

#[test]
fn publish_rejects_invalid_version() {
    let td = tempdir().expect("tempdir");
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("publish")
        .arg("not-a-version")
        .arg("--rev")
        .arg("1b843f2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaab38")
        .assert()
        .failure()
        .stderr(contains("invalid version"));
}

#[test]
fn publish_rejects_version_below_min_version() {
    let td = tempdir().expect("tempdir");
    write_config(
        td.path(),
        "minVersion: 2.0.0\ngithub:\n  owner: getsentry\n  repo: craft\n",
    );

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("publish")
        .arg("1.0.0")
        .arg("--rev")
        .arg("1b843f2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaab38")
        .assert()
        .failure()
        .stderr(contains("minVersion"));
}

#[test]
fn publish_with_no_targets_configured_succeeds_trivially() {
    let td = tempdir().expect("tempdir");
    write_config(td.path(), "github:\n  owner: getsentry\n  repo: craft\n");

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("publish")
        .arg("1.0.0")
        .arg("--rev")
        .arg("1b843f2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaab38")
        .assert()
        .success();
}

#[test]
fn publish_rejects_unknown_target_kind() {
    let td = tempdir().expect("tempdir");
    write_config(
        td.path(),
        "github:\n  owner: getsentry\n  repo: craft\ntargets:\n  - name: not-a-real-target\n",
    );

    craft_cmd()
        .arg("--root")
        .arg(td.path())
        .arg("publish")
        .arg("1.0.0")
        .arg("--rev")
        .arg("1b843f2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaab38")
        .assert()
        .failure();
}
