use crate::indexer::extract::ExtractedFile;
use crate::model::{ReceiverType, Symbol};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Resolve `recv.m()` to `Class.m` when the receiver's class is known from
    /// `self`/`cls` or a parameter annotation.
    pub infer_receiver_types: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub resolved_edges: usize,
    pub unresolved_targets: usize,
}

/// (file index, symbol index) of a symbol inside the extracted set.
type Location = (usize, usize);

/// Short-name lookups built once over every extracted file.
struct NameIndex<'a> {
    functions: HashMap<&'a str, Vec<&'a str>>,
    classes: HashMap<&'a str, Vec<&'a str>>,
    class_methods: HashMap<&'a str, &'a [String]>,
    locations: HashMap<&'a str, Location>,
}

impl<'a> NameIndex<'a> {
    fn build(files: &'a [ExtractedFile]) -> Self {
        let mut index = NameIndex {
            functions: HashMap::new(),
            classes: HashMap::new(),
            class_methods: HashMap::new(),
            locations: HashMap::new(),
        };
        for (file_idx, file) in files.iter().enumerate() {
            for (symbol_idx, symbol) in file.symbols.iter().enumerate() {
                index
                    .locations
                    .insert(symbol.qualified_name(), (file_idx, symbol_idx));
                match symbol {
                    Symbol::Function(function) => index
                        .functions
                        .entry(function.name.as_str())
                        .or_default()
                        .push(function.qualified_name.as_str()),
                    Symbol::Class(class) => {
                        index
                            .classes
                            .entry(class.name.as_str())
                            .or_default()
                            .push(class.qualified_name.as_str());
                        index
                            .class_methods
                            .insert(class.qualified_name.as_str(), class.methods.as_slice());
                    }
                }
            }
        }
        index
    }

    fn unique_function(&self, short_name: &str) -> Option<&'a str> {
        match self.functions.get(short_name).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        }
    }

    fn unique_class(&self, short_name: &str) -> Option<&'a str> {
        match self.classes.get(short_name).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        }
    }

    fn receiver_class(&self, receiver: &ReceiverType) -> Option<&'a str> {
        match receiver {
            ReceiverType::Class(qname) => self
                .class_methods
                .get_key_value(qname.as_str())
                .map(|(key, _)| *key),
            ReceiverType::Named(short) => self.unique_class(short),
        }
    }

    /// `Class.method` when the class declares the method.
    fn typed_target(&self, class_qname: &str, method: &str) -> Option<String> {
        let methods = self.class_methods.get(class_qname)?;
        if !methods.iter().any(|name| name == method) {
            return None;
        }
        let target = format!("{class_qname}.{method}");
        self.locations.contains_key(target.as_str()).then_some(target)
    }

    fn location(&self, qname: &str) -> Option<Location> {
        self.locations.get(qname).copied()
    }
}

enum SymbolEdges {
    Function {
        at: Location,
        resolved_calls: BTreeSet<String>,
        callees: Vec<Location>,
        callback_targets: Vec<Location>,
        unresolved: usize,
    },
    Class {
        at: Location,
        resolved_bases: Vec<String>,
    },
}

/// Resolves raw call targets, callbacks and base classes across all files and
/// fills the reverse edges. Must run after every file has been extracted.
pub fn resolve(files: &mut [ExtractedFile], options: ResolveOptions) -> ResolveStats {
    let edges: Vec<SymbolEdges> = {
        let index = NameIndex::build(files);
        let index = &index;
        files
            .par_iter()
            .enumerate()
            .flat_map_iter(|(file_idx, file)| {
                file.symbols
                    .iter()
                    .enumerate()
                    .map(move |(symbol_idx, symbol)| {
                        compute_edges(index, symbol, (file_idx, symbol_idx), options)
                    })
            })
            .collect()
    };

    let mut stats = ResolveStats::default();
    let mut reverse_calls: Vec<(Location, String)> = Vec::new();
    let mut reverse_callbacks: Vec<(Location, String)> = Vec::new();
    for edge in edges {
        match edge {
            SymbolEdges::Function {
                at,
                resolved_calls,
                callees,
                callback_targets,
                unresolved,
            } => {
                stats.resolved_edges += callees.len();
                stats.unresolved_targets += unresolved;
                let Some(function) = files[at.0].symbols[at.1].as_function_mut() else {
                    continue;
                };
                let caller = function.qualified_name.clone();
                function.resolved_calls = resolved_calls;
                reverse_calls.extend(callees.into_iter().map(|loc| (loc, caller.clone())));
                reverse_callbacks
                    .extend(callback_targets.into_iter().map(|loc| (loc, caller.clone())));
            }
            SymbolEdges::Class { at, resolved_bases } => {
                if let Symbol::Class(class) = &mut files[at.0].symbols[at.1] {
                    class.resolved_bases = resolved_bases;
                }
            }
        }
    }
    for ((file_idx, symbol_idx), caller) in reverse_calls {
        if let Some(target) = files[file_idx].symbols[symbol_idx].as_function_mut() {
            target.called_by.insert(caller);
        }
    }
    for ((file_idx, symbol_idx), holder) in reverse_callbacks {
        if let Some(target) = files[file_idx].symbols[symbol_idx].as_function_mut() {
            target.used_as_callback_by.insert(holder);
        }
    }
    stats
}

fn compute_edges(
    index: &NameIndex<'_>,
    symbol: &Symbol,
    at: Location,
    options: ResolveOptions,
) -> SymbolEdges {
    let function = match symbol {
        Symbol::Class(class) => {
            let resolved_bases = class
                .bases
                .iter()
                .map(|base| {
                    let short = base.rsplit('.').next().unwrap_or(base);
                    index
                        .unique_class(short)
                        .map(str::to_string)
                        .unwrap_or_else(|| base.clone())
                })
                .collect();
            return SymbolEdges::Class { at, resolved_bases };
        }
        Symbol::Function(function) => function,
    };

    let mut resolved_calls = BTreeSet::new();
    let mut callees = Vec::new();
    let mut unresolved = 0;

    // Names whose every hinted occurrence resolved through the receiver type.
    let mut typed_only: HashSet<&str> = HashSet::new();
    if options.infer_receiver_types {
        let mut failed: HashSet<&str> = HashSet::new();
        for call in &function.typed_calls {
            let target = index
                .receiver_class(&call.receiver)
                .and_then(|class| index.typed_target(class, &call.method));
            match target {
                Some(target) => {
                    if let Some(loc) = index.location(&target) {
                        if resolved_calls.insert(target) {
                            callees.push(loc);
                        }
                    }
                    typed_only.insert(call.method.as_str());
                }
                None => {
                    failed.insert(call.method.as_str());
                }
            }
        }
        typed_only.retain(|name| {
            !failed.contains(name) && !function.untyped_calls.contains(*name)
        });
    }

    for name in &function.calls {
        if typed_only.contains(name.as_str()) {
            continue;
        }
        match index.unique_function(name) {
            Some(target) => {
                if resolved_calls.insert(target.to_string()) {
                    if let Some(loc) = index.location(target) {
                        callees.push(loc);
                    }
                }
            }
            None => {
                resolved_calls.insert(name.clone());
                unresolved += 1;
            }
        }
    }

    let callback_targets = function
        .callbacks
        .iter()
        .filter_map(|name| index.unique_function(name))
        .filter_map(|target| index.location(target))
        .collect();

    SymbolEdges::Function {
        at,
        resolved_calls,
        callees,
        callback_targets,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extract::LanguageExtractor;
    use crate::indexer::python::PythonExtractor;
    use crate::model::FunctionSymbol;

    fn extract_all(sources: &[(&str, &str)]) -> Vec<ExtractedFile> {
        let mut extractor = PythonExtractor::new().unwrap();
        sources
            .iter()
            .map(|(path, source)| extractor.extract(source, path).unwrap())
            .collect()
    }

    fn function<'a>(files: &'a [ExtractedFile], qname: &str) -> &'a FunctionSymbol {
        files
            .iter()
            .flat_map(|file| file.symbols.iter())
            .filter_map(Symbol::as_function)
            .find(|f| f.qualified_name == qname)
            .unwrap_or_else(|| panic!("missing {qname}"))
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn unique_target_resolves_symmetrically() {
        let mut files = extract_all(&[
            ("a.py", "def caller():\n    helper()\n    print('x')\n"),
            ("b.py", "def helper():\n    pass\n"),
        ]);
        let stats = resolve(&mut files, ResolveOptions::default());
        assert_eq!(names(&function(&files, "a.caller").resolved_calls), vec!["b.helper", "print"]);
        assert_eq!(names(&function(&files, "b.helper").called_by), vec!["a.caller"]);
        assert_eq!(stats.resolved_edges, 1);
        assert_eq!(stats.unresolved_targets, 1);
    }

    #[test]
    fn ambiguous_target_stays_bare() {
        let mut files = extract_all(&[
            ("a.py", "def save():\n    pass\n\ndef run():\n    save()\n"),
            ("b.py", "def save():\n    pass\n"),
        ]);
        resolve(&mut files, ResolveOptions::default());
        assert_eq!(names(&function(&files, "a.run").resolved_calls), vec!["save"]);
        assert!(function(&files, "a.save").called_by.is_empty());
        assert!(function(&files, "b.save").called_by.is_empty());
    }

    #[test]
    fn callbacks_gain_reverse_edge() {
        let mut files = extract_all(&[(
            "jobs.py",
            "def work():\n    pass\n\ndef start(pool):\n    pool.submit(work, retries=3)\n",
        )]);
        resolve(&mut files, ResolveOptions::default());
        assert_eq!(names(&function(&files, "jobs.work").used_as_callback_by), vec!["jobs.start"]);
        assert!(function(&files, "jobs.work").called_by.is_empty());
    }

    #[test]
    fn bases_resolve_against_unique_classes() {
        let mut files = extract_all(&[
            ("base.py", "class Model:\n    pass\n"),
            ("user.py", "class User(base.Model, Mixin):\n    pass\n"),
        ]);
        resolve(&mut files, ResolveOptions::default());
        let user = files[1].symbols[0].as_class().unwrap();
        assert_eq!(user.resolved_bases, vec!["base.Model", "Mixin"]);
    }

    const TYPED: &str = r#"
class Repo:
    def save(self):
        pass

class Cache:
    def save(self):
        pass

def store(repo: Repo):
    repo.save()
"#;

    #[test]
    fn receiver_inference_is_off_by_default() {
        let mut files = extract_all(&[("svc.py", TYPED)]);
        resolve(&mut files, ResolveOptions::default());
        assert_eq!(names(&function(&files, "svc.store").resolved_calls), vec!["save"]);
    }

    #[test]
    fn receiver_inference_resolves_typed_calls() {
        let mut files = extract_all(&[("svc.py", TYPED)]);
        let options = ResolveOptions {
            infer_receiver_types: true,
        };
        resolve(&mut files, options);
        assert_eq!(
            names(&function(&files, "svc.store").resolved_calls),
            vec!["svc.Repo.save"]
        );
        assert_eq!(names(&function(&files, "svc.Repo.save").called_by), vec!["svc.store"]);
        assert!(function(&files, "svc.Cache.save").called_by.is_empty());
    }
}
