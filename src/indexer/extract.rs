use crate::model::{EntryPoint, Import, Symbol};
use anyhow::Result;

/// Everything the indexer learns from one file in isolation.
#[derive(Debug, Default)]
pub struct ExtractedFile {
    pub path: String,
    pub module: String,
    pub imports: Vec<Import>,
    /// Unique by qualified name, in first-definition order.
    pub symbols: Vec<Symbol>,
    pub entry_points: Vec<EntryPoint>,
}

impl ExtractedFile {
    pub fn new(path: &str, module: &str) -> Self {
        Self {
            path: path.to_string(),
            module: module.to_string(),
            ..Self::default()
        }
    }
}

/// Parse adapter seam: turns file text into per-file symbols. Implementations
/// own their parser, so one instance must not be shared across threads.
pub trait LanguageExtractor {
    fn module_name_from_rel_path(&self, rel_path: &str) -> String;
    fn extract(&mut self, source: &str, rel_path: &str) -> Result<ExtractedFile>;
}
