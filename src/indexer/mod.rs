use crate::config::Config;
use crate::index::Index;
use crate::indexer::extract::{ExtractedFile, LanguageExtractor};
use crate::indexer::python::PythonExtractor;
use crate::indexer::resolve::ResolveOptions;
use crate::indexer::scan::{IgnoreFilter, ScanOptions, ScannedFile};
use crate::indexer::stdlib::StdlibNames;
use crate::model::{Codebase, IndexDocument, IndexMetadata, IndexStats};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub mod assemble;
pub mod deps;
pub mod extract;
pub mod http;
pub mod python;
pub mod resolve;
pub mod scan;
pub mod stdlib;

pub const LANGUAGE: &str = "python";

pub struct IndexBuild {
    pub index: Index,
    pub stats: IndexStats,
}

pub struct Indexer {
    repo_root: PathBuf,
    repo_id: String,
    scan_options: ScanOptions,
    ignore_filter: Option<Arc<dyn IgnoreFilter>>,
    resolve_options: ResolveOptions,
    stdlib: StdlibNames,
    manifest_name: String,
    threads: usize,
}

impl Indexer {
    /// Fails when the root is missing or cannot be listed.
    pub fn new(repo_root: PathBuf) -> Result<Self> {
        let repo_root = scan::validate_root(&repo_root)?;
        let repo_id = repo_root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());
        let config = Config::get();
        Ok(Self {
            repo_root,
            repo_id,
            scan_options: ScanOptions::default(),
            ignore_filter: None,
            resolve_options: ResolveOptions::default(),
            stdlib: StdlibNames::default(),
            manifest_name: config.manifest_name.clone(),
            threads: config.threads,
        })
    }

    pub fn with_repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = repo_id.into();
        self
    }

    pub fn with_scan_options(mut self, scan_options: ScanOptions) -> Self {
        self.scan_options = scan_options;
        self
    }

    pub fn with_ignore_filter(mut self, filter: Arc<dyn IgnoreFilter>) -> Self {
        self.ignore_filter = Some(filter);
        self
    }

    pub fn with_resolve_options(mut self, resolve_options: ResolveOptions) -> Self {
        self.resolve_options = resolve_options;
        self
    }

    pub fn with_stdlib(mut self, stdlib: StdlibNames) -> Self {
        self.stdlib = stdlib;
        self
    }

    pub fn with_manifest_name(mut self, manifest_name: impl Into<String>) -> Self {
        self.manifest_name = manifest_name.into();
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn scan_options(&self) -> ScanOptions {
        self.scan_options
    }

    pub fn ignore_filter(&self) -> Option<Arc<dyn IgnoreFilter>> {
        self.ignore_filter.clone()
    }

    /// Full pass: scan, extract in parallel, resolve, then assemble a new index.
    pub fn build(&self) -> Result<IndexBuild> {
        let started = Instant::now();
        scan::validate_root(&self.repo_root)?;
        let scanned = scan::scan_repo(
            &self.repo_root,
            self.scan_options,
            self.ignore_filter.clone(),
        )?;
        info!("scanned {} python files under {}", scanned.len(), self.repo_root.display());

        let extracted = self.extract_all(&scanned)?;
        let mut stats = IndexStats {
            scanned: scanned.len(),
            indexed: extracted.len(),
            skipped: scanned.len() - extracted.len(),
            ..IndexStats::default()
        };
        let (mut files, sources): (Vec<ExtractedFile>, Vec<(String, String)>) = extracted
            .into_iter()
            .map(|(file, source)| {
                let path = file.path.clone();
                (file, (path, source))
            })
            .unzip();
        drop_duplicate_symbols(&mut files);

        let resolved = resolve::resolve(&mut files, self.resolve_options);
        stats.resolved_edges = resolved.resolved_edges;
        stats.unresolved_targets = resolved.unresolved_targets;
        for symbol in files.iter().flat_map(|file| file.symbols.iter()) {
            match symbol {
                crate::model::Symbol::Class(_) => stats.classes += 1,
                crate::model::Symbol::Function(_) => stats.functions += 1,
            }
        }

        let dependencies = deps::infer_dependencies(
            &self.repo_root,
            &self.manifest_name,
            files.iter().flat_map(|file| file.imports.iter()),
            &self.stdlib,
        );
        debug!(
            "{} external dependencies from {:?}",
            dependencies.names.len(),
            dependencies.source
        );
        let codebase: Codebase = assemble::assemble(&files);
        let document = IndexDocument {
            repo_id: self.repo_id.clone(),
            root_path: self.repo_root.to_string_lossy().to_string(),
            metadata: IndexMetadata {
                language: LANGUAGE.to_string(),
                external_dependencies: dependencies.names,
                dependency_source: dependencies.source,
                fingerprint: scan::fingerprint(&scanned),
                summary: None,
            },
            codebase,
        };
        let index = Index::new(document, sources.into_iter().collect::<HashMap<_, _>>());
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "indexed {} files ({} skipped): {} classes, {} functions, {} resolved edges in {}ms",
            stats.indexed,
            stats.skipped,
            stats.classes,
            stats.functions,
            stats.resolved_edges,
            stats.duration_ms
        );
        Ok(IndexBuild { index, stats })
    }

    /// One parser per rayon worker; unreadable or unparseable files are skipped.
    fn extract_all(&self, scanned: &[ScannedFile]) -> Result<Vec<(ExtractedFile, String)>> {
        // Surface a broken grammar once instead of per file.
        PythonExtractor::new().context("init python parser")?;
        let run = || {
            scanned
                .par_iter()
                .map_init(
                    || PythonExtractor::new().ok(),
                    |extractor, file| {
                        let extractor = extractor.as_mut()?;
                        extract_one(extractor, file)
                    },
                )
                .flatten()
                .collect::<Vec<_>>()
        };
        if self.threads == 0 {
            return Ok(run());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .context("build extraction pool")?;
        Ok(pool.install(run))
    }
}

fn extract_one(
    extractor: &mut PythonExtractor,
    file: &ScannedFile,
) -> Option<(ExtractedFile, String)> {
    let source = match crate::util::read_to_string(&file.abs_path) {
        Ok(source) => source,
        Err(err) => {
            warn!("skip {}: {err:#}", file.rel_path);
            return None;
        }
    };
    match extractor.extract(&source, &file.rel_path) {
        Ok(extracted) => Some((extracted, source)),
        Err(err) => {
            warn!("skip {}: {err:#}", file.rel_path);
            None
        }
    }
}

/// Module paths can collide (`a/b.py` and `a.b.py`); the first file by path
/// keeps the name.
fn drop_duplicate_symbols(files: &mut [ExtractedFile]) {
    let mut seen: HashSet<String> = HashSet::new();
    for file in files.iter_mut() {
        let path = file.path.clone();
        file.symbols.retain(|symbol| {
            let fresh = seen.insert(symbol.qualified_name().to_string());
            if !fresh {
                warn!("duplicate symbol {} in {path} ignored", symbol.qualified_name());
            }
            fresh
        });
    }
}
