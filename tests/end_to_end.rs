use anyhow::{Result, bail};
use codemap::error::IndexError;
use codemap::index::Index;
use codemap::indexer::Indexer;
use codemap::rpc::{self, App};
use codemap::summarize::SummaryBuilder;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn copy_dir(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&path, &target);
        } else {
            std::fs::copy(&path, &target).unwrap();
        }
    }
}

fn setup_repo(fixture: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    copy_dir(&fixture_path(fixture), dir.path());
    dir
}

fn app_for(root: &Path) -> App {
    let indexer = Indexer::new(root.to_path_buf()).unwrap();
    App::open(indexer, Some(Index::default_path(root))).unwrap()
}

fn rpc_call(app: &App, method: &str, params: Value) -> Value {
    let raw = rpc::call(app, method.to_string(), &params.to_string(), "7").unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn indexing_is_deterministic() {
    let repo_a = setup_repo("py_app");
    let repo_b = setup_repo("py_app");
    let doc_a = Indexer::new(repo_a.path().to_path_buf())
        .unwrap()
        .with_repo_id("py_app")
        .build()
        .unwrap();
    let doc_b = Indexer::new(repo_b.path().to_path_buf())
        .unwrap()
        .with_repo_id("py_app")
        .with_threads(1)
        .build()
        .unwrap();

    let mut a = doc_a.index.document().clone();
    let mut b = doc_b.index.document().clone();
    assert_eq!(a.metadata.fingerprint, b.metadata.fingerprint);
    a.root_path.clear();
    b.root_path.clear();
    assert_eq!(a, b);
    assert_eq!(doc_a.stats.indexed, 6);
    assert_eq!(doc_a.stats.skipped, 0);
}

#[test]
fn document_shape_matches_tree() {
    let repo = setup_repo("py_app");
    let build = Indexer::new(repo.path().to_path_buf())
        .unwrap()
        .build()
        .unwrap();
    let codebase = &build.index.document().codebase;

    let paths: Vec<_> = codebase.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "app/__init__.py",
            "app/main.py",
            "app/models.py",
            "app/services/__init__.py",
            "app/services/orders.py",
            "app/util.py",
        ]
    );
    let folders: Vec<_> = codebase
        .folders
        .iter()
        .map(|f| (f.path.as_str(), f.files.len()))
        .collect();
    assert_eq!(folders, vec![("app/", 4), ("app/services/", 2)]);

    let mut seen = HashSet::new();
    for file in &codebase.files {
        for class in &file.classes {
            assert!(seen.insert(class.qualified_name.clone()));
        }
        for function in &file.functions {
            assert!(seen.insert(function.qualified_name.clone()));
        }
    }

    let orders = &codebase.files[4];
    let service = &orders.classes[0];
    assert_eq!(service.qualified_name, "app.services.orders.OrderService");
    assert_eq!(service.class_methods, vec!["__init__", "submit"]);
    let submit = orders
        .functions
        .iter()
        .find(|f| f.name == "submit")
        .unwrap();
    assert_eq!(submit.control_flow.len(), 2);
    assert!(submit.calls.contains(&"app.util.log".to_string()));

    let entry_points: Vec<_> = codebase
        .entry_points
        .iter()
        .map(|ep| (ep.handler.as_str(), ep.method.as_str(), ep.path.as_str()))
        .collect();
    assert_eq!(
        entry_points,
        vec![
            ("app.main.create_order", "POST", "/orders"),
            ("app.main.health", "GET", "/health"),
        ]
    );
    let create_order = codebase.files[1]
        .functions
        .iter()
        .find(|f| f.name == "create_order")
        .unwrap();
    assert!(create_order.is_async);
}

#[test]
fn saved_index_round_trips() {
    let repo = setup_repo("py_app");
    let build = Indexer::new(repo.path().to_path_buf())
        .unwrap()
        .build()
        .unwrap();
    let path = Index::default_path(repo.path());
    build.index.save(&path).unwrap();
    assert!(path.ends_with(".codemap/index.json"));

    let loaded = Index::load(&path).unwrap();
    assert_eq!(loaded.document(), build.index.document());
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["metadata"]["language"], "python");
    assert!(json["codebase"]["files"][1]["functions"][0]["async"].is_boolean());

    // Sources of a loaded index come from disk.
    let code = loaded
        .source_slice(
            "app/util.py",
            loaded.symbol("app.util.log").unwrap().code_range,
        )
        .unwrap();
    assert!(code.starts_with("def log(message):"));
}

#[test]
fn rpc_methods_answer_queries() {
    let repo = setup_repo("py_app");
    let app = app_for(repo.path());

    let overview = rpc_call(&app, "overview", json!({}));
    assert_eq!(overview["id"], 7);
    assert_eq!(overview["result"]["files"], 6);
    assert_eq!(overview["result"]["entry_points"], 2);

    let traced = rpc_call(
        &app,
        "trace",
        json!({"symbol": "app.services.orders.build_order", "depth": 1}),
    );
    assert_eq!(traced["result"]["found"], true);
    assert_eq!(
        traced["result"]["graph"]["app.services.orders.build_order"],
        json!(["Order", "app.util.log"])
    );

    let ctx = rpc_call(
        &app,
        "context",
        json!({"qualname": "app.util.log", "depth": 0}),
    );
    assert_eq!(ctx["result"]["found"], true);
    assert!(
        ctx["result"]["context"]
            .as_str()
            .unwrap()
            .contains("[file: app/util.py | symbol: app.util.log]")
    );

    let symbol = rpc_call(&app, "symbol", json!({"symbol": "app.util.log"}));
    assert_eq!(symbol["result"]["kind"], "function");
    assert_eq!(symbol["result"]["file"], "app/util.py");

    let missing = rpc_call(&app, "symbol", json!({"symbol": "app.nope"}));
    assert!(missing.get("result").is_none());
    assert!(
        missing["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not found")
    );

    let unknown = rpc_call(&app, "frobnicate", json!({}));
    assert_eq!(unknown["error"]["message"], "unknown method: frobnicate");

    let help = rpc_call(&app, "help", json!({}));
    let methods = help["result"]["methods"].as_array().unwrap();
    assert!(methods.iter().any(|m| m["name"] == "refactor"));
}

#[test]
fn reindex_publishes_new_snapshot() {
    let repo = setup_repo("py_app");
    let app = app_for(repo.path());
    let before = app.handle().snapshot();
    assert!(before.symbol("app.util.trim").is_none());

    std::fs::write(
        repo.path().join("app/util.py"),
        "import os\n\n\ndef log(message):\n    print(os.getpid(), message)\n\n\ndef trim(text):\n    return text.strip()\n",
    )
    .unwrap();
    let response = rpc_call(&app, "reindex", json!({}));
    assert_eq!(response["result"]["indexed"], 6);

    let after = app.handle().snapshot();
    assert!(after.symbol("app.util.trim").is_some());
    // Readers holding the old snapshot keep a consistent view.
    assert!(before.symbol("app.util.trim").is_none());

    let reopened = app_for(repo.path());
    assert!(reopened.handle().snapshot().symbol("app.util.trim").is_some());
}

#[test]
fn explain_uses_configured_summarizer() {
    let repo = setup_repo("py_app");
    let prompts = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let captured = prompts.clone();
    let summarizer = move |prompt: &str| -> Result<String> {
        captured.lock().unwrap().push(prompt.to_string());
        Ok("places an order".to_string())
    };
    let app = app_for(repo.path()).with_summarizer(Box::new(summarizer));

    let response = rpc_call(
        &app,
        "explain",
        json!({"symbol": "app.services.orders.place_order", "depth": 1}),
    );
    assert_eq!(response["result"]["explanation"], "places an order");
    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("[file: app/services/orders.py | symbol: app.services.orders.place_order]"));

    let missing = rpc_call(&app, "explain", json!({"symbol": "app.nope"}));
    assert!(missing["error"]["message"].as_str().unwrap().contains("not found"));
}

#[test]
fn summary_builder_fills_placeholders() {
    let repo = setup_repo("py_app");
    let build = Indexer::new(repo.path().to_path_buf())
        .unwrap()
        .build()
        .unwrap();
    let summarizer = |prompt: &str| -> Result<String> {
        if prompt.contains("def health") {
            bail!("model unavailable");
        }
        Ok("summary".to_string())
    };
    let (document, stats) = SummaryBuilder::new(&summarizer).build(&build.index);
    assert_eq!(stats.failed, 1);
    assert!(stats.filled > 0);

    let main = &document.codebase.files[1];
    let health = main.functions.iter().find(|f| f.name == "health").unwrap();
    assert!(health.summary.is_none());
    let create_order = main
        .functions
        .iter()
        .find(|f| f.name == "create_order")
        .unwrap();
    assert_eq!(create_order.summary.as_deref(), Some("summary"));
    assert_eq!(main.summary.as_deref(), Some("summary"));

    let again = build.index.with_document(document);
    let (_, second) = SummaryBuilder::new(&summarizer).build(&again);
    assert_eq!(second.filled, 0);
    assert_eq!(second.failed, 1);
}

#[test]
fn missing_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent");
    let err = Indexer::new(missing.clone()).err().unwrap();
    match err.downcast_ref::<IndexError>() {
        Some(IndexError::RootNotFound(path)) => assert_eq!(path, &missing),
        other => panic!("unexpected error: {other:?}"),
    }

    let file = dir.path().join("file.py");
    std::fs::write(&file, "x = 1\n").unwrap();
    let err = Indexer::new(file).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<IndexError>(),
        Some(IndexError::RootNotDirectory(_))
    ));
}

#[test]
fn undecodable_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("good.py"), "def ok():\n    pass\n").unwrap();
    std::fs::write(dir.path().join("bad.py"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

    let build = Indexer::new(dir.path().to_path_buf())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(build.stats.scanned, 2);
    assert_eq!(build.stats.indexed, 1);
    assert_eq!(build.stats.skipped, 1);
    assert!(build.index.symbol("good.ok").is_some());
}

#[test]
fn ignore_rules_and_filters_exclude_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();
    std::fs::create_dir_all(dir.path().join("build")).unwrap();
    std::fs::create_dir_all(dir.path().join("vendor")).unwrap();
    std::fs::write(dir.path().join("build/gen.py"), "def gen():\n    pass\n").unwrap();
    std::fs::write(dir.path().join("vendor/lib.py"), "def lib():\n    pass\n").unwrap();
    std::fs::write(dir.path().join("main.py"), "def main():\n    pass\n").unwrap();

    let build = Indexer::new(dir.path().to_path_buf())
        .unwrap()
        .with_ignore_filter(Arc::new(|rel: &str| rel.starts_with("vendor")))
        .build()
        .unwrap();
    let paths: Vec<_> = build
        .index
        .document()
        .codebase
        .files
        .iter()
        .map(|f| f.path.as_str())
        .collect();
    assert_eq!(paths, vec!["main.py"]);
}
