use crate::index::Index;
use crate::trace::trace;
use crate::util;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Why a block was pulled into the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    EntryPoint,
    Caller,
    Target,
    EnclosingClass,
    Callee,
    CallbackUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextBlock {
    pub file: String,
    pub qualified_name: String,
    pub relation: Relation,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub target: String,
    pub depth: i64,
    pub blocks: Vec<ContextBlock>,
}

impl ContextBundle {
    /// An empty bundle means the target is unknown.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.blocks
            .iter()
            .any(|block| block.qualified_name == qualified_name)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            out.push_str(&format!(
                "\n[file: {} | symbol: {}]\n{}",
                block.file, block.qualified_name, block.code
            ));
        }
        out
    }
}

/// Source blocks around `target`, ordered entry points, callers, target,
/// enclosing class, trace nodes, callback users. A name is emitted once.
pub fn context(index: &Index, target: &str, depth: i64) -> ContextBundle {
    let mut builder = BundleBuilder {
        index,
        sources: HashMap::new(),
        emitted: HashSet::new(),
        blocks: Vec::new(),
    };
    let Some(entry) = index.symbol(target) else {
        return builder.finish(target, depth);
    };

    let handlers: BTreeSet<&str> = index
        .entry_points()
        .iter()
        .map(|entry_point| entry_point.handler.as_str())
        .collect();
    for handler in handlers {
        if trace(index, handler, depth).contains_key(target) {
            builder.push(handler, Relation::EntryPoint);
        }
    }
    for caller in &entry.called_by {
        builder.push(caller, Relation::Caller);
    }
    builder.push(target, Relation::Target);
    if let Some(class) = &entry.parent_class {
        builder.push(class, Relation::EnclosingClass);
    }
    for node in trace(index, target, depth).keys() {
        builder.push(node, Relation::Callee);
    }
    for holder in &entry.callback_users {
        builder.push(holder, Relation::CallbackUser);
    }
    builder.finish(target, depth)
}

struct BundleBuilder<'a> {
    index: &'a Index,
    sources: HashMap<String, Option<Cow<'a, str>>>,
    emitted: HashSet<String>,
    blocks: Vec<ContextBlock>,
}

impl BundleBuilder<'_> {
    /// Skips names already emitted and names without a readable source slice.
    fn push(&mut self, qualified_name: &str, relation: Relation) {
        if self.emitted.contains(qualified_name) {
            return;
        }
        let index = self.index;
        let Some(entry) = index.symbol(qualified_name) else {
            return;
        };
        let text = self
            .sources
            .entry(entry.file.clone())
            .or_insert_with(|| index.source_text(&entry.file));
        let Some(code) = text
            .as_deref()
            .and_then(|text| util::slice_lines(text, entry.code_range))
        else {
            return;
        };
        self.emitted.insert(qualified_name.to_string());
        self.blocks.push(ContextBlock {
            file: entry.file.clone(),
            qualified_name: qualified_name.to_string(),
            relation,
            code,
        });
    }

    fn finish(self, target: &str, depth: i64) -> ContextBundle {
        ContextBundle {
            target: target.to_string(),
            depth,
            blocks: self.blocks,
        }
    }
}
