//! Maven/Gradle artifact decomposition (§4.6): given an extracted module
//! directory, decide whether it's a BOM (POM-only) or an ordinary module, and
//! for ordinary modules build the equal-length `files`/`classifiers`/`types`
//! vectors `gpg:sign-and-deploy-file` expects, branching on distribution
//! type (plain Java/Maven, Gradle, Android, Kotlin Multiplatform).

use std::path::{Path, PathBuf};

use craft_types::CraftError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    Bom,
    Ordinary,
}

/// One module's decomposed deploy plan.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub kind: ModuleKind,
    pub pom: PathBuf,
    /// Primary artifact (absent for a BOM, whose deploy is POM-only).
    pub primary: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub classifiers: Vec<String>,
    pub types: Vec<String>,
}

/// Kotlin Multiplatform dist-dir kinds, detected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KmpKind {
    Root,
    Apple,
    KlibOnly,
}

fn detect_kmp_kind(dir_name: &str) -> Option<KmpKind> {
    if dir_name.ends_with("-metadata") || dir_name == "kotlin-multiplatform" {
        Some(KmpKind::Root)
    } else if dir_name.contains("-ios") || dir_name.contains("-macos") || dir_name.contains("-tvos") || dir_name.contains("-watchos") {
        Some(KmpKind::Apple)
    } else if dir_name.ends_with("-klib") {
        Some(KmpKind::KlibOnly)
    } else {
        None
    }
}

/// Decompose one extracted module directory into a `DeployPlan`.
///
/// `module_dir` is expected to contain exactly one of `pom-default.xml` or a
/// BOM pom (`*-bom.pom`/`pom.xml` alongside no jar), plus whichever
/// distribution-specific side files this module ships.
pub fn plan_module(module_dir: &Path) -> Result<DeployPlan, CraftError> {
    let entries = list_files(module_dir)?;
    let pom = entries
        .iter()
        .find(|p| file_name(p).ends_with(".pom") || file_name(p) == "pom-default.xml" || file_name(p) == "pom.xml")
        .cloned()
        .ok_or_else(|| CraftError::configuration("maven module", format!("no POM found in {}", module_dir.display())))?;

    let dir_name = module_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let mut files = Vec::new();
    let mut classifiers = Vec::new();
    let mut types = Vec::new();

    if let Some(kmp_kind) = detect_kmp_kind(&dir_name) {
        let primary = match kmp_kind {
            KmpKind::Root => {
                let primary = entries.iter().find(|p| file_name(p).ends_with("-all.jar")).cloned();
                if let Some(tooling) = entries.iter().find(|p| file_name(p) == "kotlin-tooling-metadata.json") {
                    files.push(tooling.clone());
                    classifiers.push("kotlin-tooling-metadata".to_string());
                    types.push("json".to_string());
                }
                push_module_file(&entries, &mut files, &mut classifiers, &mut types);
                primary
            }
            KmpKind::Apple => {
                for cinterop in entries.iter().filter(|p| file_name(p).starts_with("cinterop-") && file_name(p).ends_with(".klib")) {
                    let symbol = file_name(cinterop)
                        .strip_prefix("cinterop-")
                        .and_then(|s| s.strip_suffix(".klib"))
                        .unwrap_or("unknown")
                        .to_string();
                    files.push(cinterop.clone());
                    classifiers.push(format!("cinterop-{symbol}"));
                    types.push("klib".to_string());
                }
                if let Some(metadata_jar) = entries.iter().find(|p| file_name(p) == "metadata.jar") {
                    files.push(metadata_jar.clone());
                    classifiers.push("metadata".to_string());
                    types.push("jar".to_string());
                }
                None
            }
            KmpKind::KlibOnly => entries.iter().find(|p| file_name(p).ends_with(".klib")).cloned(),
        };

        return Ok(DeployPlan { kind: ModuleKind::Ordinary, pom, primary, files, classifiers, types });
    }

    let primary_jar = entries.iter().find(|p| {
        let name = file_name(p);
        (name.ends_with(".jar") || name.ends_with(".aar"))
            && !name.ends_with("-javadoc.jar")
            && !name.ends_with("-sources.jar")
    });

    let Some(primary) = primary_jar else {
        return Ok(DeployPlan { kind: ModuleKind::Bom, pom, primary: None, files: vec![], classifiers: vec![], types: vec![] });
    };

    // Android (`.aar` primary) gets the same javadoc/sources/module side
    // artifacts as plain Java/Gradle; the only Android-specific rule already
    // applied is `primary` itself being the `-release.aar` file.
    push_javadoc_sources(&entries, &mut files, &mut classifiers, &mut types);
    push_module_file(&entries, &mut files, &mut classifiers, &mut types);

    Ok(DeployPlan {
        kind: ModuleKind::Ordinary,
        pom,
        primary: Some(primary.clone()),
        files,
        classifiers,
        types,
    })
}

fn push_javadoc_sources(entries: &[PathBuf], files: &mut Vec<PathBuf>, classifiers: &mut Vec<String>, types: &mut Vec<String>) {
    if let Some(javadoc) = entries.iter().find(|p| file_name(p).ends_with("-javadoc.jar")) {
        files.push(javadoc.clone());
        classifiers.push("javadoc".to_string());
        types.push("jar".to_string());
    }
    if let Some(sources) = entries.iter().find(|p| file_name(p).ends_with("-sources.jar")) {
        files.push(sources.clone());
        classifiers.push("sources".to_string());
        types.push("jar".to_string());
    }
}

fn push_module_file(entries: &[PathBuf], files: &mut Vec<PathBuf>, classifiers: &mut Vec<String>, types: &mut Vec<String>) {
    if let Some(module) = entries.iter().find(|p| file_name(p).ends_with(".module")) {
        files.push(module.clone());
        classifiers.push(String::new());
        types.push("module".to_string());
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, CraftError> {
    std::fs::read_dir(dir)
        .map_err(|e| CraftError::transient(format!("failed to read module dir {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| Ok(entry.path()))
        .collect()
}

/// Package name derived from a deploy-zip filename by stripping the trailing
/// `-<version>.zip` segment, used to query the Central publisher's
/// `published?` endpoint.
pub fn package_name_from_zip(filename: &str, version: &str) -> String {
    let suffix = format!("-{version}.zip");
    filename.strip_suffix(&suffix).unwrap_or(filename).to_string()
}
