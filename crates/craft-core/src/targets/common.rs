//! Shared shape for the CLI-driven language-registry targets (§4.4): the
//! retry/idempotence envelope every one of them wraps its push invocation
//! in, and the default per-target artifact filename filter.

use craft_process::CommandResult;
use craft_types::{ArtifactNameFilter, CraftError, FilterPattern};

/// Wrap a CLI invocation in the standard retry envelope (`craft_retry`'s
/// preconfigured 5-attempt, 3s-exponential spawn-process envelope) and
/// normalize a recognized "already published" stderr signal to success
/// instead of burning through retries or surfacing a fatal error.
pub fn publish_with_idempotent_retry(
    mut invoke: impl FnMut(u32) -> anyhow::Result<CommandResult>,
    is_idempotent: impl Fn(&str) -> bool,
) -> Result<(), CraftError> {
    let result = craft_retry::retry_spawn_process(
        |attempt| -> Result<(), String> {
            match invoke(attempt) {
                Ok(r) if r.success => Ok(()),
                Ok(r) => Err(r.stderr),
                Err(e) => Err(e.to_string()),
            }
        },
        |err: &String| !is_idempotent(err),
    );

    match result {
        Ok(()) => Ok(()),
        Err(stderr) if is_idempotent(&stderr) => Ok(()),
        Err(stderr) => Err(CraftError::transient(stderr)),
    }
}

pub fn default_filter(pattern: &str) -> ArtifactNameFilter {
    ArtifactNameFilter {
        include_names: Some(FilterPattern::compile(pattern).expect("built-in default pattern compiles")),
        exclude_names: None,
    }
}

/// npm: "You cannot publish over the previously published versions".
pub fn npm_idempotent(stderr: &str) -> bool {
    stderr.contains("cannot publish over the previously published versions")
}

/// PyPI/twine: "File already exists".
pub fn pypi_idempotent(stderr: &str) -> bool {
    stderr.contains("File already exists") || stderr.contains("already exists")
}

/// `cargo publish`: crate version already on the index.
pub fn crates_idempotent(stderr: &str) -> bool {
    stderr.contains("already uploaded") || stderr.contains("already exists")
}

/// `gem push`: RubyGems rejects a duplicate version.
pub fn gem_idempotent(stderr: &str) -> bool {
    stderr.contains("Repushing of gem versions is not allowed")
}

/// `mix hex.publish`: Hex rejects republishing a released version.
pub fn hex_idempotent(stderr: &str) -> bool {
    stderr.contains("already published") || stderr.contains("was already published")
}

/// `dotnet nuget push`: NuGet.org rejects a duplicate package version.
pub fn nuget_idempotent(stderr: &str) -> bool {
    stderr.contains("already exists and cannot be modified")
}
