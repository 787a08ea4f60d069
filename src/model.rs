use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 1-based inclusive line range of a node in its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRange {
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Import,
    From,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub statement: String,
    pub kind: ImportKind,
    pub modules: Vec<String>,
}

impl Import {
    /// Top-level package of each referenced module; relative imports have none.
    pub fn top_level_modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().filter_map(|module| {
            if module.starts_with('.') {
                return None;
            }
            module.split('.').next().filter(|top| !top.is_empty())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlowKind {
    Conditional,
    ExceptionHandling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlow {
    pub kind: ControlFlowKind,
    pub code_range: CodeRange,
    pub purpose: Option<String>,
}

/// Receiver type observed at an attribute call site, e.g. `repo.save()` with
/// `repo: Repository`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReceiverType {
    /// Fully qualified enclosing class (`self` / `cls` receivers).
    Class(String),
    /// Short name taken from a parameter annotation.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypedCall {
    pub receiver: ReceiverType,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSymbol {
    pub name: String,
    pub qualified_name: String,
    pub file: String,
    pub methods: Vec<String>,
    pub bases: Vec<String>,
    pub resolved_bases: Vec<String>,
    pub code_range: CodeRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    pub name: String,
    pub qualified_name: String,
    pub file: String,
    pub is_async: bool,
    /// Raw call targets as seen at call sites.
    pub calls: BTreeSet<String>,
    /// Subset of `calls` observed at least once without a receiver type hint.
    pub untyped_calls: BTreeSet<String>,
    pub typed_calls: BTreeSet<TypedCall>,
    pub callbacks: BTreeSet<String>,
    pub control_flow: Vec<ControlFlow>,
    pub code_range: CodeRange,
    pub resolved_calls: BTreeSet<String>,
    pub called_by: BTreeSet<String>,
    pub used_as_callback_by: BTreeSet<String>,
}

impl FunctionSymbol {
    pub fn new(name: String, qualified_name: String, file: String, code_range: CodeRange) -> Self {
        Self {
            name,
            qualified_name,
            file,
            is_async: false,
            calls: BTreeSet::new(),
            untyped_calls: BTreeSet::new(),
            typed_calls: BTreeSet::new(),
            callbacks: BTreeSet::new(),
            control_flow: Vec::new(),
            code_range,
            resolved_calls: BTreeSet::new(),
            called_by: BTreeSet::new(),
            used_as_callback_by: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Class(ClassSymbol),
    Function(FunctionSymbol),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Class(class) => &class.name,
            Symbol::Function(function) => &function.name,
        }
    }

    pub fn qualified_name(&self) -> &str {
        match self {
            Symbol::Class(class) => &class.qualified_name,
            Symbol::Function(function) => &function.qualified_name,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Symbol::Class(class) => &class.file,
            Symbol::Function(function) => &function.file,
        }
    }

    pub fn code_range(&self) -> CodeRange {
        match self {
            Symbol::Class(class) => class.code_range,
            Symbol::Function(function) => function.code_range,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionSymbol> {
        match self {
            Symbol::Function(function) => Some(function),
            Symbol::Class(_) => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut FunctionSymbol> {
        match self {
            Symbol::Function(function) => Some(function),
            Symbol::Class(_) => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassSymbol> {
        match self {
            Symbol::Class(class) => Some(class),
            Symbol::Function(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryPoint {
    pub handler: String,
    pub method: String,
    pub path: String,
    pub framework: String,
}

// ---- Index document ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub repo_id: String,
    pub root_path: String,
    pub metadata: IndexMetadata,
    pub codebase: Codebase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencySource {
    Manifest,
    Imports,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub language: String,
    pub external_dependencies: Vec<String>,
    pub dependency_source: DependencySource,
    pub fingerprint: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebase {
    pub folders: Vec<FolderView>,
    pub files: Vec<FileView>,
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderView {
    pub path: String,
    pub files: Vec<String>,
    pub summary: Option<String>,
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileView {
    pub path: String,
    pub imports: Vec<Import>,
    pub classes: Vec<ClassView>,
    pub functions: Vec<FunctionView>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassView {
    pub name: String,
    pub qualified_name: String,
    pub symbol_type: String,
    pub class_type: Option<String>,
    pub class_inherits_from: Vec<String>,
    pub class_methods: Vec<String>,
    pub code_range: CodeRange,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionView {
    pub name: String,
    pub qualified_name: String,
    pub symbol_type: String,
    #[serde(rename = "async")]
    pub is_async: bool,
    pub calls: Vec<String>,
    pub called_by: Vec<String>,
    pub used_as_callback_by: Vec<CallbackUse>,
    pub control_flow: Vec<ControlFlow>,
    pub code_range: CodeRange,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackUse {
    pub used_by: String,
    pub confidence: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub classes: usize,
    pub functions: usize,
    pub resolved_edges: usize,
    pub unresolved_targets: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct RepoOverview {
    pub repo_id: String,
    pub root_path: String,
    pub files: usize,
    pub folders: usize,
    pub classes: usize,
    pub functions: usize,
    pub entry_points: usize,
    pub external_dependencies: Vec<String>,
    pub fingerprint: String,
}
