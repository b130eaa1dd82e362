use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use miya::{Context, Environment, Error, FileSystemLoader, FnLoader, MemoryLoader};

#[test]
fn test_filesystem_loader_renders_inheritance_chain() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("layouts")).unwrap();
    fs::write(
        dir.path().join("layouts/base.html"),
        "<main>{% block body %}{% endblock %}</main>\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("index.html"),
        "{% extends 'layouts/base.html' %}{% block body %}{% include 'partials/hi.html' %}{% endblock %}",
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("partials")).unwrap();
    fs::write(dir.path().join("partials/hi.html"), "hi {{ name }}").unwrap();

    let env = Environment::new().with_loader(FileSystemLoader::new(dir.path()));
    let mut ctx = Context::new();
    ctx.set("name", "there");
    assert_eq!(
        env.render_template("index.html", &ctx).unwrap(),
        "<main>hi there</main>\n"
    );

    let mut names = env.list_templates().unwrap();
    names.sort();
    assert_eq!(
        names,
        vec!["index.html", "layouts/base.html", "partials/hi.html"]
    );
}

#[test]
fn test_filesystem_loader_rejects_escaping_names() {
    let root = tempfile::tempdir().unwrap();
    let templates = root.path().join("templates");
    fs::create_dir_all(&templates).unwrap();
    fs::write(root.path().join("secret.txt"), "secret").unwrap();

    let env = Environment::new().with_loader(FileSystemLoader::new(&templates));
    let err = env
        .render_template("../secret.txt", &Context::new())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    env.add_template("sneaky.html", "{% include '../secret.txt' %}");
    assert!(env.render_template("sneaky.html", &Context::new()).is_err());
}

#[test]
fn test_memory_templates_shadow_loader() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("page.html"), "from disk").unwrap();

    let env = Environment::new().with_loader(FileSystemLoader::new(dir.path()));
    assert_eq!(env.render_template("page.html", &Context::new()).unwrap(), "from disk");

    env.add_template("page.html", "from memory");
    assert_eq!(env.render_template("page.html", &Context::new()).unwrap(), "from memory");
}

#[test]
fn test_cache_reloads_after_invalidate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.txt");
    fs::write(&path, "v1").unwrap();

    let env = Environment::new().with_loader(FileSystemLoader::new(dir.path()));
    assert_eq!(env.render_template("note.txt", &Context::new()).unwrap(), "v1");

    fs::write(&path, "v2").unwrap();
    assert_eq!(env.render_template("note.txt", &Context::new()).unwrap(), "v1");

    assert!(env.invalidate("note.txt"));
    assert_eq!(env.render_template("note.txt", &Context::new()).unwrap(), "v2");

    env.clear_cache();
    assert_eq!(env.cache_stats().entries, 0);
}

#[test]
fn test_loader_is_consulted_once_per_name() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let env = Environment::new().with_loader(FnLoader::new(move |name: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(match name {
            "greeting" => Some("Hello {{ who }}".to_string()),
            _ => None,
        })
    }));

    let mut ctx = Context::new();
    ctx.set("who", "loader");
    for _ in 0..3 {
        assert_eq!(env.render_template("greeting", &ctx).unwrap(), "Hello loader");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = env.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);

    let err = env.render_template("farewell", &ctx).unwrap_err();
    assert!(matches!(err, Error::TemplateNotFound(name) if name == "farewell"));
}

#[test]
fn test_parse_errors_are_not_cached() {
    let loader = MemoryLoader::new().with("broken.html", "{% if x %}never closed");
    let env = Environment::new().with_loader(loader);
    assert!(matches!(
        env.get_template("broken.html").unwrap_err(),
        Error::Parse { .. }
    ));
    assert_eq!(env.cache_stats().entries, 0);

    env.add_template("broken.html", "fixed");
    assert_eq!(env.render_template("broken.html", &Context::new()).unwrap(), "fixed");
}
