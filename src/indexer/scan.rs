use crate::error::IndexError;
use anyhow::{Context, Result};
use blake3::Hasher;
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub const SUBJECT_EXTENSIONS: &[&str] = &["py"];
pub const OUTPUT_DIR: &str = ".codemap";

/// Path predicate consulted for every file and directory below the root.
/// Paths are root-relative with `/` separators; an ignored directory is not
/// descended into.
pub trait IgnoreFilter: Send + Sync {
    fn is_ignored(&self, rel_path: &str) -> bool;
}

impl<F> IgnoreFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_ignored(&self, rel_path: &str) -> bool {
        self(rel_path)
    }
}

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub hash: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub no_ignore: bool,
    pub max_file_size: u64,
}

impl ScanOptions {
    pub fn new(no_ignore: bool) -> Self {
        Self {
            no_ignore,
            ..Self::default()
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            no_ignore: false,
            max_file_size: crate::config::Config::get().max_file_size_mb * 1024 * 1024,
        }
    }
}

/// Fails fast when the root cannot be traversed; returns the canonical root.
pub fn validate_root(repo_root: &Path) -> std::result::Result<PathBuf, IndexError> {
    if !repo_root.exists() {
        return Err(IndexError::RootNotFound(repo_root.to_path_buf()));
    }
    if !repo_root.is_dir() {
        return Err(IndexError::RootNotDirectory(repo_root.to_path_buf()));
    }
    fs::read_dir(repo_root).map_err(|source| IndexError::RootUnreadable {
        path: repo_root.to_path_buf(),
        source,
    })?;
    Ok(fs::canonicalize(repo_root).unwrap_or_else(|_| repo_root.to_path_buf()))
}

pub fn scan_repo(
    repo_root: &Path,
    options: ScanOptions,
    filter: Option<Arc<dyn IgnoreFilter>>,
) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let mut builder = WalkBuilder::new(repo_root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
    }
    let root = repo_root.to_path_buf();
    let walker = builder
        .hidden(false)
        .filter_entry(move |entry| !is_ignored_entry(entry, &root, filter.as_deref()))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                warn!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if !is_subject_file(path) {
            continue;
        }
        let rel_path = crate::util::normalize_rel_path(repo_root, path)?;
        let size = match fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                warn!("skip {rel_path}: {err}");
                continue;
            }
        };
        if size > options.max_file_size {
            warn!(
                "skipping large file ({}MB): {rel_path}",
                size / (1024 * 1024)
            );
            continue;
        }
        let hash = match hash_file(path) {
            Ok(hash) => hash,
            Err(err) => {
                warn!("skip {rel_path}: {err:#}");
                continue;
            }
        };
        files.push(ScannedFile {
            rel_path,
            abs_path: path.to_path_buf(),
            hash,
        });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn is_ignored_entry(entry: &ignore::DirEntry, root: &Path, filter: Option<&dyn IgnoreFilter>) -> bool {
    let name = entry.file_name();
    if name == OsStr::new(".git") || name == OsStr::new(OUTPUT_DIR) {
        return true;
    }
    let Some(filter) = filter else {
        return false;
    };
    if entry.depth() == 0 {
        return false;
    }
    match crate::util::normalize_rel_path(root, entry.path()) {
        Ok(rel) => filter.is_ignored(&rel),
        Err(_) => false,
    }
}

pub fn is_subject_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUBJECT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Order-independent digest of the scanned tree: paths plus content hashes.
pub fn fingerprint(files: &[ScannedFile]) -> String {
    let mut entries: Vec<(&str, &str)> = files
        .iter()
        .map(|file| (file.rel_path.as_str(), file.hash.as_str()))
        .collect();
    entries.sort_unstable();
    let mut hasher = Hasher::new();
    for (path, hash) in entries {
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
        hasher.update(&[b'\n']);
    }
    hasher.finalize().to_hex().to_string()
}

fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path).with_context(|| format!("hash {}", path.display()))?;
    let mut hasher = Hasher::new();
    hasher.update(&data);
    Ok(hasher.finalize().to_hex().to_string())
}
