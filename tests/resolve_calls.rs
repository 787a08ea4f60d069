use codemap::index::Index;
use codemap::indexer::Indexer;
use codemap::indexer::resolve::ResolveOptions;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn build(root: &Path, options: ResolveOptions) -> Index {
    Indexer::new(root.to_path_buf())
        .unwrap()
        .with_resolve_options(options)
        .build()
        .unwrap()
        .index
}

#[test]
fn method_call_resolves_across_files() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "file1.py",
        "class Widget:\n    def render(self):\n        log(\"x\")\n",
    );
    write(dir.path(), "file2.py", "def log(msg):\n    print(msg)\n");

    let index = build(dir.path(), ResolveOptions::default());
    let render = index.symbol("file1.Widget.render").unwrap();
    assert_eq!(render.calls, vec!["file2.log".to_string()]);
    assert_eq!(render.parent_class.as_deref(), Some("file1.Widget"));

    let log = index.symbol("file2.log").unwrap();
    assert_eq!(log.called_by, vec!["file1.Widget.render".to_string()]);
    assert_eq!(log.calls, vec!["print".to_string()]);
}

#[test]
fn resolved_edges_are_symmetric() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "pkg/a.py",
        "def start():\n    middle()\n    missing()\n\ndef end():\n    pass\n",
    );
    write(dir.path(), "pkg/b.py", "def middle():\n    end()\n    start()\n");

    let index = build(dir.path(), ResolveOptions::default());
    for entry in index.symbols() {
        for callee in &entry.calls {
            if let Some(target) = index.symbol(callee) {
                assert!(
                    target.called_by.contains(&entry.qualified_name),
                    "{} -> {} has no back edge",
                    entry.qualified_name,
                    callee
                );
            }
        }
        for caller in &entry.called_by {
            let source = index.symbol(caller).unwrap();
            assert!(source.calls.contains(&entry.qualified_name));
        }
    }
    let start = index.symbol("pkg.a.start").unwrap();
    assert_eq!(
        start.calls,
        vec!["missing".to_string(), "pkg.b.middle".to_string()]
    );
}

#[test]
fn ambiguous_names_stay_unresolved() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.py", "def save():\n    pass\n");
    write(dir.path(), "b.py", "def save():\n    pass\n");
    write(dir.path(), "c.py", "def run():\n    save()\n");

    let index = build(dir.path(), ResolveOptions::default());
    assert_eq!(index.symbol("c.run").unwrap().calls, vec!["save".to_string()]);
    assert!(index.symbol("a.save").unwrap().called_by.is_empty());
    assert!(index.symbol("b.save").unwrap().called_by.is_empty());
}

#[test]
fn callbacks_link_back_to_holder() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "jobs.py",
        "def handle(item):\n    return item\n\ndef run(items):\n    return list(map(handle, items))\n",
    );

    let index = build(dir.path(), ResolveOptions::default());
    let handle = index.symbol("jobs.handle").unwrap();
    assert_eq!(handle.callback_users, vec!["jobs.run".to_string()]);
    assert!(handle.called_by.is_empty());

    let file = &index.document().codebase.files[0];
    let view = file
        .functions
        .iter()
        .find(|f| f.qualified_name == "jobs.handle")
        .unwrap();
    assert_eq!(view.used_as_callback_by[0].used_by, "jobs.run");
    assert_eq!(view.used_as_callback_by[0].confidence, "static");
}

#[test]
fn receiver_inference_picks_declaring_class() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "store.py",
        "class Disk:\n    def save(self):\n        pass\n\nclass Cloud:\n    def save(self):\n        pass\n",
    );
    write(
        dir.path(),
        "app.py",
        "def persist(target: Disk):\n    target.save()\n",
    );

    let plain = build(dir.path(), ResolveOptions::default());
    assert_eq!(plain.symbol("app.persist").unwrap().calls, vec!["save".to_string()]);

    let inferred = build(
        dir.path(),
        ResolveOptions {
            infer_receiver_types: true,
        },
    );
    assert_eq!(
        inferred.symbol("app.persist").unwrap().calls,
        vec!["store.Disk.save".to_string()]
    );
    assert_eq!(
        inferred.symbol("store.Disk.save").unwrap().called_by,
        vec!["app.persist".to_string()]
    );
    assert!(inferred.symbol("store.Cloud.save").unwrap().called_by.is_empty());
}

#[test]
fn base_classes_resolve_to_qualified_names() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "base.py", "class Model:\n    pass\n");
    write(
        dir.path(),
        "user.py",
        "import base\n\nclass User(base.Model, Mixin):\n    pass\n",
    );

    let index = build(dir.path(), ResolveOptions::default());
    let file = index
        .document()
        .codebase
        .files
        .iter()
        .find(|f| f.path == "user.py")
        .unwrap();
    assert_eq!(
        file.classes[0].class_inherits_from,
        vec!["base.Model".to_string(), "Mixin".to_string()]
    );
}

#[test]
fn helpers_nested_in_methods_belong_to_the_class() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "mod.py",
        "class C:\n    def m(self):\n        def h():\n            pass\n        h()\n\ndef outer():\n    def inner():\n        pass\n    inner()\n",
    );

    let index = build(dir.path(), ResolveOptions::default());
    let helper = index.symbol("mod.C.h").unwrap();
    assert_eq!(helper.parent_class.as_deref(), Some("mod.C"));
    assert_eq!(helper.called_by, vec!["mod.C.m".to_string()]);
    assert_eq!(index.symbol("mod.outer").unwrap().calls, vec!["mod.inner".to_string()]);
    assert!(index.symbol("mod.C.m.h").is_none());
    assert!(index.symbol("mod.outer.inner").is_none());

    let class = &index.document().codebase.files[0].classes[0];
    assert_eq!(class.class_methods, vec!["m", "h"]);
}
