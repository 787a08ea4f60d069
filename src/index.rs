use crate::indexer::scan::OUTPUT_DIR;
use crate::model::{CodeRange, EntryPoint, IndexDocument, RepoOverview};
use crate::util;
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Function,
}

/// Query-side view of one symbol, rebuilt from the document on load.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolEntry {
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub code_range: CodeRange,
    /// Resolved calls; unresolved targets are kept as bare names.
    pub calls: Vec<String>,
    pub called_by: Vec<String>,
    pub callback_users: Vec<String>,
    /// Owning class when this function is a method.
    pub parent_class: Option<String>,
}

#[derive(Debug, Clone)]
enum Sources {
    /// Texts read while indexing, keyed by relative path.
    Captured(Arc<HashMap<String, String>>),
    /// Read on demand below the index's root path.
    Disk(PathBuf),
}

/// A finished, immutable index. Rebuilds produce a new value.
#[derive(Debug, Clone)]
pub struct Index {
    document: IndexDocument,
    symbols: HashMap<String, SymbolEntry>,
    sources: Sources,
}

impl Index {
    pub fn new(document: IndexDocument, sources: HashMap<String, String>) -> Self {
        Self::with_sources(document, Sources::Captured(Arc::new(sources)))
    }

    /// Serves source text from the document's `root_path`.
    pub fn from_document(document: IndexDocument) -> Self {
        let root = PathBuf::from(&document.root_path);
        Self::with_sources(document, Sources::Disk(root))
    }

    fn with_sources(document: IndexDocument, sources: Sources) -> Self {
        let symbols = build_symbol_table(&document);
        Self {
            document,
            symbols,
            sources,
        }
    }

    /// Same sources, new document (e.g. after summaries were filled in).
    pub fn with_document(&self, document: IndexDocument) -> Self {
        Self::with_sources(document, self.sources.clone())
    }

    pub fn default_path(repo_root: &Path) -> PathBuf {
        repo_root.join(OUTPUT_DIR).join(INDEX_FILE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = util::read_to_string(path)?;
        let document: IndexDocument =
            serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        debug!("loaded index {} ({} files)", path.display(), document.codebase.files.len());
        Ok(Self::from_document(document))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.document)?;
        util::write_string(path, &text)
    }

    pub fn document(&self) -> &IndexDocument {
        &self.document
    }

    pub fn symbol(&self, qualified_name: &str) -> Option<&SymbolEntry> {
        self.symbols.get(qualified_name)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.symbols.values()
    }

    /// Direct call targets of a node; unknown and unresolved names have none.
    pub fn outgoing(&self, node: &str) -> &[String] {
        self.symbols
            .get(node)
            .map(|entry| entry.calls.as_slice())
            .unwrap_or(&[])
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.document.codebase.entry_points
    }

    pub fn source_text(&self, file: &str) -> Option<Cow<'_, str>> {
        match &self.sources {
            Sources::Captured(texts) => texts.get(file).map(|text| Cow::Borrowed(text.as_str())),
            Sources::Disk(root) => util::read_to_string(&root.join(file)).ok().map(Cow::Owned),
        }
    }

    pub fn source_slice(&self, file: &str, range: CodeRange) -> Option<String> {
        let text = self.source_text(file)?;
        util::slice_lines(&text, range)
    }

    pub fn overview(&self) -> RepoOverview {
        let document = &self.document;
        let classes = self
            .symbols
            .values()
            .filter(|entry| entry.kind == SymbolKind::Class)
            .count();
        RepoOverview {
            repo_id: document.repo_id.clone(),
            root_path: document.root_path.clone(),
            files: document.codebase.files.len(),
            folders: document.codebase.folders.len(),
            classes,
            functions: self.symbols.len() - classes,
            entry_points: document.codebase.entry_points.len(),
            external_dependencies: document.metadata.external_dependencies.clone(),
            fingerprint: document.metadata.fingerprint.clone(),
        }
    }
}

fn build_symbol_table(document: &IndexDocument) -> HashMap<String, SymbolEntry> {
    let mut symbols = HashMap::new();
    let mut parents: HashMap<String, String> = HashMap::new();
    for file in &document.codebase.files {
        for class in &file.classes {
            for method in &class.class_methods {
                parents.insert(
                    format!("{}.{method}", class.qualified_name),
                    class.qualified_name.clone(),
                );
            }
            symbols.insert(
                class.qualified_name.clone(),
                SymbolEntry {
                    name: class.name.clone(),
                    qualified_name: class.qualified_name.clone(),
                    kind: SymbolKind::Class,
                    file: file.path.clone(),
                    code_range: class.code_range,
                    calls: Vec::new(),
                    called_by: Vec::new(),
                    callback_users: Vec::new(),
                    parent_class: None,
                },
            );
        }
        for function in &file.functions {
            symbols.insert(
                function.qualified_name.clone(),
                SymbolEntry {
                    name: function.name.clone(),
                    qualified_name: function.qualified_name.clone(),
                    kind: SymbolKind::Function,
                    file: file.path.clone(),
                    code_range: function.code_range,
                    calls: function.calls.clone(),
                    called_by: function.called_by.clone(),
                    callback_users: function
                        .used_as_callback_by
                        .iter()
                        .map(|usage| usage.used_by.clone())
                        .collect(),
                    parent_class: None,
                },
            );
        }
    }
    for (method, class) in parents {
        if let Some(entry) = symbols.get_mut(&method) {
            entry.parent_class = Some(class);
        }
    }
    symbols
}

/// Atomically published index shared by concurrent readers.
pub struct IndexHandle {
    current: ArcSwap<Index>,
}

impl IndexHandle {
    pub fn new(index: Index) -> Self {
        Self {
            current: ArcSwap::from_pointee(index),
        }
    }

    /// Readers keep a consistent snapshot for as long as they hold it.
    pub fn snapshot(&self) -> Arc<Index> {
        self.current.load_full()
    }

    pub fn publish(&self, index: Index) {
        self.current.store(Arc::new(index));
    }
}
