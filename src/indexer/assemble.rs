use crate::indexer::extract::ExtractedFile;
use crate::model::{
    CallbackUse, ClassSymbol, ClassView, Codebase, EntryPoint, FileView, FolderView,
    FunctionSymbol, FunctionView, Symbol,
};
use std::collections::BTreeMap;
use std::path::Path;

const CALLBACK_CONFIDENCE: &str = "static";
const CALLBACK_REASON: &str = "Passed as identifier";

/// Folds resolved per-file symbols into file and folder views. Every file
/// appears once, symbol-less files included.
pub fn assemble(files: &[ExtractedFile]) -> Codebase {
    let mut file_views: Vec<FileView> = files.iter().map(file_view).collect();
    file_views.sort_by(|a, b| a.path.cmp(&b.path));

    let mut folders: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for view in &file_views {
        let (folder, basename) = split_folder(&view.path);
        folders.entry(folder).or_default().push(basename);
    }
    let folders = folders
        .into_iter()
        .map(|(path, mut files)| {
            files.sort();
            FolderView {
                path,
                files,
                summary: None,
                responsibilities: Vec::new(),
            }
        })
        .collect();

    let mut entry_points: Vec<EntryPoint> = files
        .iter()
        .flat_map(|file| file.entry_points.iter().cloned())
        .collect();
    entry_points.sort();
    entry_points.dedup();

    Codebase {
        folders,
        files: file_views,
        entry_points,
    }
}

fn file_view(file: &ExtractedFile) -> FileView {
    let mut symbols: Vec<&Symbol> = file.symbols.iter().collect();
    symbols.sort_by(|a, b| {
        a.code_range()
            .start_line
            .cmp(&b.code_range().start_line)
            .then_with(|| a.qualified_name().cmp(b.qualified_name()))
    });
    let mut classes = Vec::new();
    let mut functions = Vec::new();
    for symbol in symbols {
        match symbol {
            Symbol::Class(class) => classes.push(class_view(class)),
            Symbol::Function(function) => functions.push(function_view(function)),
        }
    }
    FileView {
        path: file.path.clone(),
        imports: file.imports.clone(),
        classes,
        functions,
        summary: None,
    }
}

fn class_view(class: &ClassSymbol) -> ClassView {
    ClassView {
        name: class.name.clone(),
        qualified_name: class.qualified_name.clone(),
        symbol_type: "class".to_string(),
        class_type: None,
        class_inherits_from: class.resolved_bases.clone(),
        class_methods: class.methods.clone(),
        code_range: class.code_range,
        summary: None,
    }
}

fn function_view(function: &FunctionSymbol) -> FunctionView {
    FunctionView {
        name: function.name.clone(),
        qualified_name: function.qualified_name.clone(),
        symbol_type: "function".to_string(),
        is_async: function.is_async,
        calls: function.resolved_calls.iter().cloned().collect(),
        called_by: function.called_by.iter().cloned().collect(),
        used_as_callback_by: function
            .used_as_callback_by
            .iter()
            .map(|holder| CallbackUse {
                used_by: holder.clone(),
                confidence: CALLBACK_CONFIDENCE.to_string(),
                reason: CALLBACK_REASON.to_string(),
            })
            .collect(),
        control_flow: function.control_flow.clone(),
        code_range: function.code_range,
        summary: None,
    }
}

/// `pkg/sub/mod.py` -> (`pkg/sub/`, `mod.py`); root files live in `./`.
fn split_folder(path: &str) -> (String, String) {
    let as_path = Path::new(path);
    let basename = as_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    let folder = match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => format!("{dir}/"),
        _ => "./".to_string(),
    };
    (folder, basename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extract::LanguageExtractor;
    use crate::indexer::python::PythonExtractor;

    #[test]
    fn folders_group_basenames() {
        assert_eq!(split_folder("main.py"), ("./".to_string(), "main.py".to_string()));
        assert_eq!(
            split_folder("pkg/sub/mod.py"),
            ("pkg/sub/".to_string(), "mod.py".to_string())
        );
    }

    #[test]
    fn every_file_appears_once_even_without_symbols() {
        let mut extractor = PythonExtractor::new().unwrap();
        let files = vec![
            extractor.extract("X = 1\n", "pkg/consts.py").unwrap(),
            extractor
                .extract("def b():\n    pass\n\ndef a():\n    pass\n", "main.py")
                .unwrap(),
            extractor.extract("", "pkg/__init__.py").unwrap(),
        ];
        let codebase = assemble(&files);
        let paths: Vec<_> = codebase.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["main.py", "pkg/__init__.py", "pkg/consts.py"]);
        let folders: Vec<_> = codebase
            .folders
            .iter()
            .map(|f| (f.path.as_str(), f.files.clone()))
            .collect();
        assert_eq!(
            folders,
            vec![
                ("./", vec!["main.py".to_string()]),
                ("pkg/", vec!["__init__.py".to_string(), "consts.py".to_string()]),
            ]
        );
        let names: Vec<_> = codebase.files[0]
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(codebase.files[2].functions.is_empty());
    }
}
