//! # craft
//!
//! The publish orchestrator, target implementations, and preparation
//! pipeline behind `craft`: a release-automation engine that drives a
//! software release from a tagged revision out to whichever package
//! registries a project's `.craft.yml` names (npm, PyPI, crates.io,
//! RubyGems, Hex, NuGet, Maven/Sonatype, pub.dev, Cloud Storage, a
//! generic Git mirror, and an in-house release registry).
//!
//! ## Pipeline
//!
//! A release runs in two phases, matched by the two CLI subcommands
//! ([`craft-cli`](https://crates.io/crates/craft-cli)) that drive this crate:
//!
//! 1. **`craft prepare`** ([`prepare`]) resolves or computes the version,
//!    creates an isolated git worktree on a `release/<version>` branch,
//!    bumps every configured target's version files, runs the optional
//!    pre-release command, and opens (or diffs, in `--dry-run`) the release
//!    commit.
//! 2. **`craft publish`** ([`orchestrator`]) resolves artifacts for the
//!    tagged revision via an [`artifact_provider::ArtifactProvider`], then
//!    runs each configured [`target::Target`] in config order, continuing
//!    past a failed target only in `--dry-run`.
//!
//! ## Module map
//!
//! - [`target`] — the `Target` trait every publish target implements, plus
//!   the shared [`target::PublishCtx`] each `publish` call receives.
//! - [`targets`] — one module per target kind.
//! - [`factory`] — builds a concrete `Target` from a `.craft.yml` entry by
//!   name, with no compile-time knowledge of which targets a given config
//!   uses (§9's "dynamic target discovery").
//! - [`orchestrator`] — sequences target execution for `craft publish`.
//! - [`prepare`] — the version-bump / changelog / branch pipeline behind
//!   `craft prepare`.
//! - [`artifact_provider`] — where built artifacts live and how they're
//!   fetched, against a CI backend abstracted behind [`artifact_provider::CiClient`].
//! - [`status_provider`] — combined legacy-status + checks-API verdict for a
//!   revision, used by `craft prepare` to confirm CI is green before
//!   opening a release.
//! - [`github`] — the GitHub REST API v3 client backing both of the above.
//! - [`template`] — the logic-free `{{foo.bar}}` substitution engine used
//!   for GCS paths and release-registry URL templates.
//! - [`reporter`] — the `info`/`warn`/`error` output seam every target and
//!   pipeline stage writes through, instead of printing directly.

pub mod artifact_provider;
pub mod factory;
pub mod github;
pub mod orchestrator;
pub mod prepare;
pub mod reporter;
pub mod status_provider;
pub mod target;
pub mod targets;
pub mod template;
