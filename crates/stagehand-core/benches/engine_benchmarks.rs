use criterion::{criterion_group, criterion_main, Criterion};
use stagehand_core::{EngineOptions, ExcludedPathCollector, HookBus, StageEngine};
use stagehand_runtime::{MockBackend, StageBackend};
use stagehand_schema::{OwnerId, PackageRequirement, SiteId};
use stagehand_store::{Metadata, PathLocator};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// A project with `files` small files spread over a web root.
fn create_test_project(dir: &Path, files: usize) -> PathLocator {
    let root = dir.join("app");
    let web = root.join("web/modules/custom");
    fs::create_dir_all(&web).unwrap();
    fs::write(root.join("composer.json"), r#"{"require": {}}"#).unwrap();
    for i in 0..files {
        fs::write(web.join(format!("file_{i:03}.php")), format!("<?php // {i}\n")).unwrap();
    }
    fs::create_dir_all(root.join(".git/objects")).unwrap();
    PathLocator::new(SiteId::new("bench"), root)
        .with_web_root("web")
        .with_staging_root(dir.join("stages"))
        .with_state_dir(dir.join("state"))
}

fn engine(locator: &PathLocator) -> StageEngine {
    let backend: Arc<dyn StageBackend> = Arc::new(MockBackend::new());
    let mut bus = HookBus::new();
    bus.add_subscriber(Arc::new(ExcludedPathCollector::with_builtin_sources(
        Vec::new(),
        vec!["sites/default/files".to_owned()],
    )));
    StageEngine::new(
        locator.clone(),
        backend,
        bus,
        OwnerId::new("bench"),
        EngineOptions::default(),
    )
}

fn bench_create_destroy(c: &mut Criterion) {
    c.bench_function("engine_create_destroy_100files", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let locator = create_test_project(dir.path(), 100);
                (dir, engine(&locator))
            },
            |(_dir, mut engine)| {
                engine.create(Metadata::new()).unwrap();
                engine.destroy(false).unwrap();
            },
        );
    });
}

fn bench_full_cycle(c: &mut Criterion) {
    let req: PackageRequirement = "vendor/pkg:1.0.0".parse().unwrap();
    c.bench_function("engine_full_cycle_100files", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let locator = create_test_project(dir.path(), 100);
                (dir, engine(&locator))
            },
            |(_dir, mut engine)| {
                engine.create(Metadata::new()).unwrap();
                engine.require(std::slice::from_ref(&req), &[]).unwrap();
                engine.apply().unwrap();
                engine.destroy(false).unwrap();
            },
        );
    });
}

fn bench_status_check(c: &mut Criterion) {
    c.bench_function("engine_status_with_stage", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let locator = create_test_project(dir.path(), 10);
                let mut engine = engine(&locator);
                engine.create(Metadata::new()).unwrap();
                (dir, engine)
            },
            |(_dir, engine)| {
                engine.status().unwrap();
            },
        );
    });
}

criterion_group!(
    benches,
    bench_create_destroy,
    bench_full_cycle,
    bench_status_check,
);
criterion_main!(benches);
