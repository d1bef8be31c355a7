//! End-to-end builds over an in-memory module source

use std::collections::BTreeSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use splitpack_lib::bundler::{BuildResult, Bundler};
use splitpack_lib::cli::BuildOptions;
use splitpack_lib::config::{CacheGroupConfig, Config};
use splitpack_lib::error::BuildError;
use splitpack_lib::graph::{ModuleId, ModuleKind};
use splitpack_lib::resolver::{DependencyRecord, ExportsRequest, MemoryModule, MemorySource};

fn config(dir: &TempDir, entries: &[(&str, &str)]) -> Config {
    let mut config = Config::default_config().with_entrypoints(entries.iter().copied());
    config.root = dir.path().to_path_buf();
    config
}

fn shared_threshold(config: &mut Config, threshold: usize) {
    config.optimization.split_chunks.cache_groups = vec![CacheGroupConfig {
        threshold,
        ..CacheGroupConfig::new("shared")
    }];
}

async fn build(config: Config, source: &Arc<MemorySource>) -> BuildResult {
    let mut bundler =
        Bundler::with_source(config, BuildOptions::default(), Arc::<MemorySource>::clone(source)).unwrap();
    bundler.build().await.unwrap().completed().unwrap()
}

fn members(result: &BuildResult, chunk: &str) -> BTreeSet<String> {
    let chunk = result.chunks.named_chunk(chunk).unwrap();
    chunk
        .modules
        .iter()
        .map(|m| result.modules.module(*m).unwrap().identifier.clone())
        .collect()
}

fn size_of(result: &BuildResult, chunk: &str) -> u64 {
    let chunk = result.chunks.named_chunk(chunk).unwrap();
    result.chunks.chunk_size(chunk.ukey, &result.modules, 0)
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A, B and C each import S (100) and are 50 themselves
fn three_pages() -> Arc<MemorySource> {
    let page = |name: &str| MemoryModule::new(name).size(50).import("./s.js", &["s"]);
    Arc::new(
        MemorySource::new()
            .with_module("a.js", page("a"))
            .with_module("b.js", page("b"))
            .with_module("c.js", page("c"))
            .with_module("s.js", MemoryModule::new("s").size(100).exports(&["s"])),
    )
}

const PAGES: [(&str, &str); 3] = [("A", "./a.js"), ("B", "./b.js"), ("C", "./c.js")];

#[tokio::test]
async fn test_shared_module_scenario_before_optimization() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, &PAGES);
    config.optimization.split_chunks.enabled = false;

    let result = build(config, &three_pages()).await;

    assert_eq!(result.chunks.chunk_count(), 3);
    for (name, own) in [("A", "a.js"), ("B", "b.js"), ("C", "c.js")] {
        assert_eq!(members(&result, name), set(&[own, "s.js"]));
        assert_eq!(size_of(&result, name), 150);
    }
}

#[tokio::test]
async fn test_shared_module_scenario_after_optimization() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, &PAGES);
    shared_threshold(&mut config, 2);

    let result = build(config, &three_pages()).await;

    assert_eq!(result.chunks.chunk_count(), 4);
    let shared = result.chunks.named_chunk("shared").unwrap();
    assert_eq!(members(&result, "shared"), set(&["s.js"]));
    assert_eq!(size_of(&result, "shared"), 100);
    assert_eq!(shared.groups.len(), 3);

    for (name, own) in [("A", "a.js"), ("B", "b.js"), ("C", "c.js")] {
        assert_eq!(members(&result, name), set(&[own]));
        assert_eq!(size_of(&result, name), 50);

        // The shared chunk loads first
        let group = result.chunks.entrypoint(name).unwrap();
        let own_chunk = result.chunks.named_chunk(name).unwrap().ukey;
        assert_eq!(group.chunks, vec![shared.ukey, own_chunk]);
    }

    let manifest = result.manifest();
    assert_eq!(manifest.entrypoints["B"].chunks, vec!["shared", "B"]);
    assert!(manifest.entrypoints.values().all(|e| e.renderable));
}

#[tokio::test]
async fn test_split_threshold_boundary() {
    let entries = [("one", "./one.js"), ("two", "./two.js"), ("three", "./three.js")];
    let page = |name: &str| MemoryModule::new(name).size(10);

    // lib is shared by exactly `threshold` chunks
    let at_threshold = Arc::new(
        MemorySource::new()
            .with_module("one.js", page("1").import("./lib.js", &["f"]))
            .with_module("two.js", page("2").import("./lib.js", &["f"]))
            .with_module("three.js", page("3"))
            .with_module("lib.js", MemoryModule::new("lib").size(40).exports(&["f"])),
    );
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir, &entries);
    shared_threshold(&mut cfg, 2);
    let result = build(cfg, &at_threshold).await;

    assert!(result.chunks.named_chunk("shared").is_none());
    let lib = result.modules.module_id("lib.js").unwrap();
    assert_eq!(result.chunks.chunks_of_module(lib).len(), 2);

    // One more importer tips it over
    let over_threshold = Arc::new(
        MemorySource::new()
            .with_module("one.js", page("1").import("./lib.js", &["f"]))
            .with_module("two.js", page("2").import("./lib.js", &["f"]))
            .with_module("three.js", page("3").import("./lib.js", &["f"]))
            .with_module("lib.js", MemoryModule::new("lib").size(40).exports(&["f"])),
    );
    let total = |result: &BuildResult| -> u64 {
        entries.iter().map(|(name, _)| size_of(result, name)).sum()
    };

    let mut before = config(&dir, &entries);
    before.optimization.split_chunks.enabled = false;
    let before = build(before, &over_threshold).await;

    let mut after = config(&dir, &entries);
    shared_threshold(&mut after, 2);
    let after = build(after, &over_threshold).await;

    assert_eq!(members(&after, "shared"), set(&["lib.js"]));
    assert_eq!(total(&before), 150);
    assert_eq!(total(&after), 30);
    assert!(total(&after) < total(&before));
}

#[tokio::test]
async fn test_cyclic_usage_scenario() {
    let source = Arc::new(
        MemorySource::new()
            .with_module("a.js", MemoryModule::new("a").exports(&["y", "w"]).import("./b.js", &["x"]))
            .with_module("b.js", MemoryModule::new("b").exports(&["x", "z"]).import("./a.js", &["y"])),
    );
    let dir = TempDir::new().unwrap();
    let result = build(config(&dir, &[("main", "./a.js")]), &source).await;

    let exports = |identifier: &str| {
        let id = result.modules.module_id(identifier).unwrap();
        result.modules.exports_info(id).unwrap().clone()
    };
    let a = exports("a.js");
    let b = exports("b.js");
    assert!(b.used("x"));
    assert!(a.used("y"));
    assert!(!b.used("z"));
    assert!(!a.used("w"));
    assert_eq!(b.used_exports(), vec!["x"]);
    assert_eq!(a.used_exports(), vec!["y"]);
}

#[tokio::test]
async fn test_usage_is_sound() {
    let source = Arc::new(
        MemorySource::new()
            .with_module(
                "main.js",
                MemoryModule::new("main")
                    .import("./lib.js", &["a"])
                    .dependency(DependencyRecord::new("./ns.js", ExportsRequest::Namespace))
                    .dependency(DependencyRecord::new("./dyn.js", ExportsRequest::Dynamic)),
            )
            .with_module(
                "lib.js",
                MemoryModule::new("lib")
                    .exports(&[])
                    .reexport_all("./inner.js")
                    .dependency(DependencyRecord::new(
                        "./other.js",
                        ExportsRequest::Reexport(vec![("c".to_string(), "d".to_string())]),
                    )),
            )
            .with_module("inner.js", MemoryModule::new("inner").exports(&["a", "b"]))
            .with_module("other.js", MemoryModule::new("other").exports(&["d", "e"]))
            .with_module("ns.js", MemoryModule::new("ns").exports(&["n"]))
            .with_module(
                "dyn.js",
                MemoryModule::new("dyn").kind(ModuleKind::Dynamic),
            ),
    );
    let dir = TempDir::new().unwrap();
    let result = build(config(&dir, &[("main", "./main.js")]), &source).await;
    let graph = &result.modules;
    let info = |identifier: &str| graph.exports_info(graph.module_id(identifier).unwrap()).unwrap();

    assert!(info("inner.js").used("a"));
    assert!(!info("inner.js").used("b"));
    assert!(!info("other.js").used("d"));
    assert!(info("ns.js").has_unknown_usage());
    assert!(info("dyn.js").has_unknown_usage());

    // Nothing a reachable connection asks for is reported unused
    for id in graph.module_ids() {
        for connection in graph.outgoing_connections(id) {
            let target = graph.exports_info(connection.target).unwrap();
            match &connection.exports {
                ExportsRequest::Named(names) => {
                    for name in names {
                        assert!(target.used(name), "{} of {}", name, connection.request);
                    }
                }
                request if request.is_unanalyzable() => assert!(target.has_unknown_usage()),
                _ => {}
            }
        }
    }
}

#[tokio::test]
async fn test_errors_only_affect_their_groups() {
    let source = Arc::new(
        MemorySource::new()
            .with_module("good.js", MemoryModule::new("good").import("./util.js", &[]))
            .with_module(
                "bad.js",
                MemoryModule::new("bad")
                    .import("./util.js", &[])
                    .import("./missing.js", &[])
                    .import("./broken.js", &[])
                    .dependency(DependencyRecord::named("./optional.js", &[]).optional()),
            )
            .with_module("util.js", MemoryModule::new("util"))
            .with_module("broken.js", MemoryModule::new("broken").failing("unexpected token")),
    );
    let dir = TempDir::new().unwrap();
    let result = build(config(&dir, &[("good", "./good.js"), ("bad", "./bad.js")]), &source).await;

    assert!(result.has_errors());
    let errors = result.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .any(|(id, e)| *id == "bad.js" && matches!(e, BuildError::Resolve { request, .. } if request == "./missing.js")));
    assert!(errors
        .iter()
        .any(|(id, e)| *id == "broken.js" && matches!(e, BuildError::Build { .. })));

    let warnings = result.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].0, "bad.js");

    assert!(result.chunks.entrypoint("good").unwrap().is_renderable());
    assert!(!result.chunks.entrypoint("bad").unwrap().is_renderable());

    let manifest = result.manifest();
    assert!(manifest.entrypoints["good"].renderable);
    assert!(!manifest.entrypoints["bad"].renderable);
}

#[tokio::test]
async fn test_async_imports_get_their_own_groups() {
    let source = Arc::new(
        MemorySource::new()
            .with_module("main.js", MemoryModule::new("main").size(10).dynamic_import("./page.js"))
            .with_module("page.js", MemoryModule::new("page").size(20).dynamic_import("./main.js")),
    );
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, &[("main", "./main.js")]);
    config.optimization.split_chunks.enabled = false;
    let result = build(config, &source).await;

    // main -> page -> main again, as a lazy chunk
    assert_eq!(result.chunks.groups().count(), 3);
    let manifest = result.manifest();
    let entry = &manifest.entrypoints["main"];
    assert_eq!(entry.chunks, vec!["main"]);
    assert_eq!(entry.async_chunks.len(), 2);

    let page = result.modules.module_id("page.js").unwrap();
    assert_eq!(result.chunks.chunks_of_module(page).len(), 1);
}

#[tokio::test]
async fn test_builds_are_deterministic() {
    let source = || {
        Arc::new(
            MemorySource::new()
                .with_module(
                    "main.js",
                    MemoryModule::new("main")
                        .import("./x.js", &["x"])
                        .import("./y.js", &["y"])
                        .dynamic_import("./lazy.js"),
                )
                .with_module("admin.js", MemoryModule::new("admin").import("./y.js", &["y"]))
                .with_module("x.js", MemoryModule::new("x").exports(&["x"]).import("./y.js", &["y"]))
                .with_module("y.js", MemoryModule::new("y").exports(&["y"]))
                .with_module("lazy.js", MemoryModule::new("lazy").import("./x.js", &["x"]))
                .with_latency(std::time::Duration::from_millis(1)),
        )
    };
    let entries = [("main", "./main.js"), ("admin", "./admin.js")];

    let dir = TempDir::new().unwrap();
    let first = build(config(&dir, &entries), &source()).await;
    let second = build(config(&dir, &entries), &source()).await;

    assert_eq!(first.manifest(), second.manifest());
    assert_eq!(
        first.manifest().to_json().unwrap(),
        second.manifest().to_json().unwrap()
    );

    let orders = |result: &BuildResult| -> Vec<(Vec<String>, Vec<String>)> {
        let names = |ids: &[ModuleId]| -> Vec<String> {
            ids.iter()
                .map(|id| result.modules.module(*id).unwrap().identifier.clone())
                .collect()
        };
        result
            .chunks
            .groups()
            .map(|g| (names(g.pre_order()), names(g.post_order())))
            .collect()
    };
    assert_eq!(orders(&first), orders(&second));

    let main = first.chunks.entrypoint("main").unwrap();
    let identifiers = |ids: &[ModuleId]| -> Vec<String> {
        ids.iter()
            .map(|id| first.modules.module(*id).unwrap().identifier.clone())
            .collect()
    };
    assert_eq!(
        (identifiers(main.pre_order()), identifiers(main.post_order())),
        (
            vec!["main.js".to_string(), "x.js".to_string(), "y.js".to_string()],
            vec!["y.js".to_string(), "x.js".to_string(), "main.js".to_string()]
        )
    );
}
