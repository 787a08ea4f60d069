use crate::indexer::stdlib::StdlibNames;
use crate::model::{DependencySource, Import};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependencies {
    /// Sorted, deduplicated top-level package names.
    pub names: Vec<String>,
    pub source: DependencySource,
}

/// Manifest names win when the manifest yields any; otherwise the imports
/// recorded across the repository are surveyed.
pub fn infer_dependencies<'a, I>(
    root: &Path,
    manifest_name: &str,
    imports: I,
    stdlib: &StdlibNames,
) -> Dependencies
where
    I: IntoIterator<Item = &'a Import>,
{
    let manifest_path = root.join(manifest_name);
    if manifest_path.is_file() {
        match fs::read_to_string(&manifest_path) {
            Ok(text) => {
                let names = from_manifest(&text, stdlib);
                if !names.is_empty() {
                    return Dependencies {
                        names,
                        source: DependencySource::Manifest,
                    };
                }
                debug!("{manifest_name} lists no packages, surveying imports");
            }
            Err(err) => warn!("read {}: {err}", manifest_path.display()),
        }
    }
    let local = intra_repo_names(root);
    Dependencies {
        names: from_imports(imports, &local, stdlib),
        source: DependencySource::Imports,
    }
}

pub fn from_manifest(text: &str, stdlib: &StdlibNames) -> Vec<String> {
    let names: BTreeSet<String> = text
        .lines()
        .filter_map(parse_manifest_line)
        .filter(|name| !stdlib.contains(name))
        .collect();
    names.into_iter().collect()
}

/// Package name of one requirement line, or `None` for blanks, comments,
/// pip options and malformed entries.
pub fn parse_manifest_line(line: &str) -> Option<String> {
    let line = match line.find(" #") {
        Some(idx) => &line[..idx],
        None => line,
    };
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
        return None;
    }
    let end = line
        .find(|ch: char| "=<>~!;[@, \t".contains(ch))
        .unwrap_or(line.len());
    let name = &line[..end];
    valid_distribution_name(name).then(|| name.to_string())
}

fn valid_distribution_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}

pub fn from_imports<'a, I>(imports: I, local: &HashSet<String>, stdlib: &StdlibNames) -> Vec<String>
where
    I: IntoIterator<Item = &'a Import>,
{
    let mut names = BTreeSet::new();
    for import in imports {
        for top in import.top_level_modules() {
            if local.contains(top) || stdlib.contains(top) {
                continue;
            }
            names.insert(top.to_string());
        }
    }
    names.into_iter().collect()
}

/// Root-level directories and module files, which imports may name directly.
pub fn intra_repo_names(root: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("list {}: {err}", root.display());
            return names;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            names.insert(name.to_string());
        } else if let Some(stem) = name.strip_suffix(".py") {
            names.insert(stem.to_string());
        }
    }
    names
}
