use crate::indexer::extract::{ExtractedFile, LanguageExtractor};
use crate::indexer::http;
use crate::model::{
    ClassSymbol, CodeRange, ControlFlow, ControlFlowKind, EntryPoint, FunctionSymbol, Import,
    ImportKind, ReceiverType, Symbol, TypedCall,
};
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Node, Parser};

/// Lexical position threaded down the walk. A fresh scope is built only when
/// entering a class or function, so siblings never observe each other's state.
#[derive(Clone, Default)]
struct Scope {
    /// Module path of the file; classes are always parented by it.
    module: String,
    /// Innermost enclosing class, also inside its method bodies. Functions
    /// defined anywhere below it are its methods.
    class: Option<String>,
    /// Innermost enclosing function; calls and control flow attach here.
    function: Option<String>,
    /// Class bound to `self` / `cls` in the current method.
    self_type: Option<String>,
    /// Annotated parameters visible in the current function.
    param_types: HashMap<String, String>,
}

impl Scope {
    /// `Class.name` below a class, `module.name` otherwise.
    fn function_name(&self, name: &str) -> String {
        let parent = self.class.as_deref().unwrap_or(&self.module);
        format!("{parent}.{name}")
    }
}

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_python::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for PythonExtractor {
    fn module_name_from_rel_path(&self, rel_path: &str) -> String {
        module_name_from_rel_path(rel_path)
    }

    fn extract(&mut self, source: &str, rel_path: &str) -> Result<ExtractedFile> {
        let module = module_name_from_rel_path(rel_path);
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("parse failed"))?;
        let mut out = Collector::new(source, ExtractedFile::new(rel_path, &module));
        let scope = Scope {
            module,
            ..Scope::default()
        };
        walk_node(tree.root_node(), &scope, &mut out);
        Ok(out.file)
    }
}

/// `pkg/sub/mod.py` -> `pkg.sub.mod`; `pkg/__init__.py` keeps its `__init__`
/// segment so it never collides with a sibling `pkg.py`.
pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let path = Path::new(rel_path);
    let mut parts: Vec<String> = path
        .components()
        .filter_map(|comp| comp.as_os_str().to_str().map(|s| s.to_string()))
        .collect();
    let Some(file) = parts.pop() else {
        return String::new();
    };
    let stem = file.strip_suffix(".py").unwrap_or(&file).to_string();
    parts.push(stem);
    parts.join(".")
}

struct Collector<'s> {
    source: &'s str,
    file: ExtractedFile,
    positions: HashMap<String, usize>,
}

impl<'s> Collector<'s> {
    fn new(source: &'s str, file: ExtractedFile) -> Self {
        Self {
            source,
            file,
            positions: HashMap::new(),
        }
    }

    /// Later definitions of the same qualified name replace earlier ones.
    fn register(&mut self, symbol: Symbol) {
        let qname = symbol.qualified_name().to_string();
        match self.positions.get(&qname) {
            Some(&idx) => self.file.symbols[idx] = symbol,
            None => {
                self.positions.insert(qname, self.file.symbols.len());
                self.file.symbols.push(symbol);
            }
        }
    }

    fn function_mut(&mut self, qname: &str) -> Option<&mut FunctionSymbol> {
        let idx = *self.positions.get(qname)?;
        self.file.symbols[idx].as_function_mut()
    }

    fn add_method(&mut self, class_qname: &str, method: &str) {
        let Some(&idx) = self.positions.get(class_qname) else {
            return;
        };
        if let Symbol::Class(class) = &mut self.file.symbols[idx] {
            if !class.methods.iter().any(|existing| existing == method) {
                class.methods.push(method.to_string());
            }
        }
    }
}

fn walk_node(node: Node<'_>, scope: &Scope, out: &mut Collector<'_>) {
    match node.kind() {
        "class_definition" => {
            handle_class(node, scope, out);
            return;
        }
        "function_definition" => {
            handle_function(node, scope, out);
            return;
        }
        "import_statement" | "import_from_statement" | "future_import_statement" => {
            let text = node_text(node, out.source);
            if let Some(import) = parse_import(&text) {
                out.file.imports.push(import);
            }
            return;
        }
        "decorated_definition" => handle_decorated_definition(node, scope, out),
        "call" => handle_call(node, scope, out),
        "if_statement" | "match_statement" => {
            push_control_flow(node, scope, out, ControlFlowKind::Conditional)
        }
        "try_statement" => push_control_flow(node, scope, out, ControlFlowKind::ExceptionHandling),
        _ => {}
    }
    walk_children(node, scope, out);
}

fn walk_children(node: Node<'_>, scope: &Scope, out: &mut Collector<'_>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, scope, out);
    }
}

fn handle_class(node: Node<'_>, scope: &Scope, out: &mut Collector<'_>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        walk_children(node, scope, out);
        return;
    };
    let name = node_text(name_node, out.source);
    let qualified_name = format!("{}.{name}", scope.module);
    let superclasses = node.child_by_field_name("superclasses");
    let bases = superclasses
        .map(|args| base_class_names(args, out.source))
        .unwrap_or_default();
    out.register(Symbol::Class(ClassSymbol {
        name,
        qualified_name: qualified_name.clone(),
        file: out.file.path.clone(),
        methods: Vec::new(),
        bases,
        resolved_bases: Vec::new(),
        code_range: range(node),
    }));

    // Base expressions are evaluated in the enclosing scope.
    if let Some(args) = superclasses {
        walk_node(args, scope, out);
    }
    let inner = Scope {
        module: scope.module.clone(),
        class: Some(qualified_name),
        function: scope.function.clone(),
        self_type: scope.self_type.clone(),
        param_types: scope.param_types.clone(),
    };
    if let Some(body) = node.child_by_field_name("body") {
        walk_children(body, &inner, out);
    }
}

fn base_class_names(args: Node<'_>, source: &str) -> Vec<String> {
    let mut bases = Vec::new();
    let mut cursor = args.walk();
    for child in args.named_children(&mut cursor) {
        if matches!(child.kind(), "keyword_argument" | "comment") {
            continue;
        }
        let base = node_text(child, source);
        if !base.is_empty() {
            bases.push(base);
        }
    }
    bases
}

fn handle_function(node: Node<'_>, scope: &Scope, out: &mut Collector<'_>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        walk_children(node, scope, out);
        return;
    };
    let name = node_text(name_node, out.source);
    let qualified_name = scope.function_name(&name);
    let mut function = FunctionSymbol::new(
        name.clone(),
        qualified_name.clone(),
        out.file.path.clone(),
        range(node),
    );
    function.is_async = node.child(0).map(|first| first.kind() == "async").unwrap_or(false);
    out.register(Symbol::Function(function));
    if let Some(class) = scope.class.as_deref() {
        out.add_method(class, &name);
    }

    let mut param_types = scope.param_types.clone();
    if let Some(params) = node.child_by_field_name("parameters") {
        collect_parameter_types(params, out.source, &mut param_types);
        // Defaults are evaluated where the function is defined.
        walk_node(params, scope, out);
    }
    let inner = Scope {
        module: scope.module.clone(),
        class: scope.class.clone(),
        function: Some(qualified_name),
        self_type: scope.class.clone().or_else(|| scope.self_type.clone()),
        param_types,
    };
    if let Some(body) = node.child_by_field_name("body") {
        walk_children(body, &inner, out);
    }
}

/// Records `name: Type` parameters; an unannotated parameter shadows any
/// outer annotation of the same name.
fn collect_parameter_types(params: Node<'_>, source: &str, types: &mut HashMap<String, String>) {
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        match param.kind() {
            "identifier" => {
                types.remove(&node_text(param, source));
            }
            "default_parameter" => {
                if let Some(name) = param.child_by_field_name("name") {
                    types.remove(&node_text(name, source));
                }
            }
            "typed_parameter" | "typed_default_parameter" => {
                let name = param
                    .child_by_field_name("name")
                    .or_else(|| param.named_child(0))
                    .filter(|node| node.kind() == "identifier")
                    .map(|node| node_text(node, source));
                let annotation = param
                    .child_by_field_name("type")
                    .and_then(|node| annotation_type_name(&node_text(node, source)));
                match (name, annotation) {
                    (Some(name), Some(annotation)) => {
                        types.insert(name, annotation);
                    }
                    (Some(name), None) => {
                        types.remove(&name);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

/// Short class name of a plain annotation (`Repo`, `models.Repo`, `"Repo"`).
/// Generic or union annotations give no hint.
fn annotation_type_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|ch| ch == '"' || ch == '\'');
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '.')
    {
        return None;
    }
    trimmed
        .rsplit('.')
        .next()
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
}

fn handle_call(node: Node<'_>, scope: &Scope, out: &mut Collector<'_>) {
    let Some(caller) = scope.function.as_deref() else {
        return;
    };
    let source = out.source;
    let mut raw_target = None;
    let mut typed = None;
    if let Some(target) = node.child_by_field_name("function") {
        match target.kind() {
            "identifier" => raw_target = Some(node_text(target, source)),
            "attribute" => {
                if let Some(attr) = target.child_by_field_name("attribute") {
                    let method = node_text(attr, source);
                    typed = target
                        .child_by_field_name("object")
                        .and_then(|object| receiver_type(object, scope, source))
                        .map(|receiver| TypedCall {
                            receiver,
                            method: method.clone(),
                        });
                    raw_target = Some(method);
                }
            }
            _ => {}
        }
    }
    let callbacks = node
        .child_by_field_name("arguments")
        .map(|args| callback_candidates(args, source))
        .unwrap_or_default();

    let Some(function) = out.function_mut(caller) else {
        return;
    };
    if let Some(name) = raw_target.filter(|name| !name.is_empty()) {
        function.calls.insert(name.clone());
        match typed {
            Some(call) => {
                function.typed_calls.insert(call);
            }
            None => {
                function.untyped_calls.insert(name);
            }
        }
    }
    function.callbacks.extend(callbacks);
}

fn receiver_type(object: Node<'_>, scope: &Scope, source: &str) -> Option<ReceiverType> {
    if object.kind() != "identifier" {
        return None;
    }
    let name = node_text(object, source);
    if name == "self" || name == "cls" {
        return scope.self_type.clone().map(ReceiverType::Class);
    }
    scope.param_types.get(&name).cloned().map(ReceiverType::Named)
}

/// Identifiers passed by name, positionally or as keyword values.
fn callback_candidates(args: Node<'_>, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = args.walk();
    for child in args.named_children(&mut cursor) {
        let value = match child.kind() {
            "identifier" => Some(child),
            "keyword_argument" => child
                .child_by_field_name("value")
                .filter(|value| value.kind() == "identifier"),
            _ => None,
        };
        if let Some(value) = value {
            let name = node_text(value, source);
            if !name.is_empty() && name != "self" && name != "cls" {
                out.push(name);
            }
        }
    }
    out
}

fn push_control_flow(
    node: Node<'_>,
    scope: &Scope,
    out: &mut Collector<'_>,
    kind: ControlFlowKind,
) {
    let Some(caller) = scope.function.as_deref() else {
        return;
    };
    if let Some(function) = out.function_mut(caller) {
        function.control_flow.push(ControlFlow {
            kind,
            code_range: range(node),
            purpose: None,
        });
    }
}

fn handle_decorated_definition(node: Node<'_>, scope: &Scope, out: &mut Collector<'_>) {
    let Some(definition) = node.child_by_field_name("definition") else {
        return;
    };
    if definition.kind() != "function_definition" {
        return;
    }
    let Some(name_node) = definition.child_by_field_name("name") else {
        return;
    };
    let handler = scope.function_name(&node_text(name_node, out.source));
    let mut cursor = node.walk();
    let decorators: Vec<Node<'_>> = node
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "decorator")
        .collect();
    let entry_points = entry_points_from_decorators(&decorators, &handler, out.source);
    out.file.entry_points.extend(entry_points);
}

fn entry_points_from_decorators(
    decorators: &[Node<'_>],
    handler: &str,
    source: &str,
) -> Vec<EntryPoint> {
    let mut entry_points = Vec::new();
    for decorator in decorators {
        let Some((name, args)) = decorator_call_info(*decorator, source) else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        let raw_path = args
            .positional
            .first()
            .and_then(|arg| extract_string_literal(*arg, source))
            .unwrap_or_else(|| "/".to_string());
        let path = http::normalize_route_path(&raw_path);
        let (framework, methods) = if let Some(method) = http::normalize_method(&name) {
            ("fastapi", vec![method])
        } else if name == "route" {
            let mut methods = methods_from_keywords(&args, source);
            if methods.is_empty() {
                methods.push("GET".to_string());
            }
            ("flask", methods)
        } else if name == "api_route" {
            let mut methods = methods_from_keywords(&args, source);
            if methods.is_empty() {
                methods.push(http::HTTP_ANY.to_string());
            }
            ("fastapi", methods)
        } else {
            continue;
        };
        for method in methods {
            entry_points.push(EntryPoint {
                handler: handler.to_string(),
                method,
                path: path.clone(),
                framework: framework.to_string(),
            });
        }
    }
    entry_points
}

fn decorator_call_info<'a>(node: Node<'a>, source: &str) -> Option<(String, CallArgs<'a>)> {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "call" {
            let function = child.child_by_field_name("function")?;
            if function.kind() != "attribute" {
                return None;
            }
            let name = node_text(function.child_by_field_name("attribute")?, source);
            let args = parse_call_arguments(child, source);
            return Some((name, args));
        }
    }
    None
}

struct CallArgs<'a> {
    positional: Vec<Node<'a>>,
    keywords: Vec<(String, Node<'a>)>,
}

fn parse_call_arguments<'a>(node: Node<'a>, source: &str) -> CallArgs<'a> {
    let mut positional = Vec::new();
    let mut keywords = Vec::new();
    let Some(args) = node.child_by_field_name("arguments") else {
        return CallArgs {
            positional,
            keywords,
        };
    };
    let mut cursor = args.walk();
    for child in args.named_children(&mut cursor) {
        if child.kind() == "keyword_argument" {
            if let (Some(name_node), Some(value_node)) = (
                child.child_by_field_name("name"),
                child.child_by_field_name("value"),
            ) {
                keywords.push((node_text(name_node, source), value_node));
            }
            continue;
        }
        if child.kind() != "comment" {
            positional.push(child);
        }
    }
    CallArgs {
        positional,
        keywords,
    }
}

fn methods_from_keywords(args: &CallArgs<'_>, source: &str) -> Vec<String> {
    for (name, value) in &args.keywords {
        if name == "methods" {
            return extract_string_list(*value, source)
                .into_iter()
                .filter_map(|raw| http::normalize_method(&raw))
                .collect();
        }
    }
    Vec::new()
}

fn extract_string_literal(node: Node<'_>, source: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    unquote_string_literal(&node_text(node, source))
}

fn extract_string_list(node: Node<'_>, source: &str) -> Vec<String> {
    if matches!(node.kind(), "list" | "tuple" | "set") {
        let mut cursor = node.walk();
        return node
            .named_children(&mut cursor)
            .filter_map(|child| extract_string_literal(child, source))
            .collect();
    }
    extract_string_literal(node, source).into_iter().collect()
}

fn unquote_string_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let prefix_len = trimmed
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_alphabetic())
        .map(|(offset, _)| offset)
        .unwrap_or(trimmed.len());
    let rest = &trimmed[prefix_len..];
    for quote in ["'''", "\"\"\"", "\"", "'"] {
        if rest.len() >= quote.len() * 2 && rest.starts_with(quote) && rest.ends_with(quote) {
            return Some(rest[quote.len()..rest.len() - quote.len()].to_string());
        }
    }
    None
}

/// Classifies an import statement and lists the modules it names. `from`
/// imports reference their base module only.
pub fn parse_import(text: &str) -> Option<Import> {
    let statement = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = statement.trim_end_matches(';').trim();
    if let Some(rest) = cleaned.strip_prefix("import ") {
        let modules: Vec<String> = rest
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .map(|name| name.to_string())
            .collect();
        return Some(Import {
            statement,
            kind: ImportKind::Import,
            modules,
        });
    }
    if let Some(rest) = cleaned.strip_prefix("from ") {
        let base = match rest.split_once(" import") {
            Some((base, _)) => base.trim(),
            None => rest.split_whitespace().next().unwrap_or(""),
        };
        let modules = if base.is_empty() {
            Vec::new()
        } else {
            vec![base.to_string()]
        };
        return Some(Import {
            statement,
            kind: ImportKind::From,
            modules,
        });
    }
    None
}

fn range(node: Node<'_>) -> CodeRange {
    CodeRange {
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    }
}

fn node_text(node: Node<'_>, source: &str) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    source.get(start..end).unwrap_or("").trim().to_string()
}
