// Emits git SHA, build profile, and rustc version as `rustc-env` values
// consumed by `craft --version --verbose`. Stdlib + `std::process::Command`
// only — no vergen — to keep the supply chain tight.

use std::process::Command;

fn main() {
    let git_sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=CRAFT_GIT_SHA={git_sha}");

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=CRAFT_BUILD_PROFILE={profile}");

    println!("cargo:rerun-if-changed=build.rs");
}
