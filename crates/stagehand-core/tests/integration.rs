use stagehand_core::{
    CoreError, EngineOptions, EventKind, ExcludedPath, ExcludedPathCollector, HookBus, HookError,
    PathExcluder, StageEngine, StageEvent,
};
use stagehand_runtime::{BackendCall, FailPoint, MockBackend, StageBackend};
use stagehand_schema::{parse_config_str, OwnerId, PackageRequirement, SiteId};
use stagehand_store::{FailureMarker, Metadata, OwnershipStore, PathLocator, StageState};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

/// A project tree plus separate staging and state directories.
struct Site {
    _dir: tempfile::TempDir,
    locator: PathLocator,
    backend: Arc<MockBackend>,
}

impl Site {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        fs::create_dir_all(root.join("web")).unwrap();
        fs::write(root.join("composer.json"), r#"{"require": {}}"#).unwrap();
        fs::write(root.join("web").join("index.php"), "<?php\n").unwrap();
        let locator = PathLocator::new(SiteId::new("integration"), &root)
            .with_web_root("web")
            .with_staging_root(dir.path().join("stages"))
            .with_state_dir(dir.path().join("state"));
        Self {
            _dir: dir,
            locator,
            backend: Arc::new(MockBackend::new()),
        }
    }

    fn engine(&self, owner: &str) -> StageEngine {
        self.engine_with(owner, HookBus::new())
    }

    fn engine_with(&self, owner: &str, bus: HookBus) -> StageEngine {
        let backend: Arc<dyn StageBackend> = self.backend.clone();
        StageEngine::new(
            self.locator.clone(),
            backend,
            bus,
            OwnerId::new(owner),
            EngineOptions::default(),
        )
    }

    fn store(&self) -> OwnershipStore {
        OwnershipStore::new(self.locator.clone())
    }

    fn marker(&self) -> FailureMarker {
        FailureMarker::new(&self.locator)
    }

    fn root(&self) -> &Path {
        self.locator.project_root()
    }
}

fn req(s: &str) -> PackageRequirement {
    s.parse().unwrap()
}

#[test]
fn second_create_is_busy_for_any_owner() {
    let site = Site::new();
    let mut alice = site.engine("alice");
    let token = alice.create(Metadata::new()).unwrap();

    for owner in ["alice", "bob"] {
        let err = site.engine(owner).create(Metadata::new()).unwrap_err();
        match err {
            CoreError::StageBusy {
                owner_id,
                token: held,
            } => {
                assert_eq!(owner_id, "alice");
                assert_eq!(held, token.as_str());
            }
            other => panic!("expected StageBusy for {owner}, got {other}"),
        }
    }
    assert!(matches!(
        alice.create(Metadata::new()),
        Err(CoreError::StageBusy { .. })
    ));
}

#[test]
fn destroy_twice_is_a_noop() {
    let site = Site::new();
    let mut e = site.engine("alice");
    let token = e.create(Metadata::new()).unwrap();
    let stage_dir = site.locator.stage_dir(&token);
    assert!(stage_dir.exists());

    e.destroy(false).unwrap();
    e.destroy(false).unwrap();
    assert!(!stage_dir.exists());
    assert!(site.store().current_owner().unwrap().is_none());

    site.engine("nobody").destroy(false).unwrap();
}

#[test]
fn precreate_metadata_survives_create() {
    let site = Site::new();
    let mut bus = HookBus::new();
    bus.subscribe(EventKind::PreCreate, 0, "needs-initial", |e| {
        if e.get_metadata("initial").is_none() {
            e.add_error("initial metadata not visible to pre-create");
        }
        Ok(())
    });
    bus.subscribe(EventKind::PreCreate, 1, "computes", |e| {
        e.set_metadata("computed", serde_json::json!({"drupal/token": "1.9.0"}));
        Ok(())
    });

    let mut e = site.engine_with("alice", bus);
    let mut initial = Metadata::new();
    initial.insert("initial".to_owned(), serde_json::json!(true));
    e.create(initial).unwrap();

    assert_eq!(
        e.get_metadata("computed").unwrap(),
        Some(serde_json::json!({"drupal/token": "1.9.0"}))
    );
    assert_eq!(e.get_metadata("initial").unwrap(), Some(serde_json::json!(true)));

    e.set_metadata("later", serde_json::json!([1, 2])).unwrap();
    let resumed = {
        let mut other = site.engine("alice");
        other.claim(e.token().unwrap()).unwrap();
        other.get_metadata("later").unwrap()
    };
    assert_eq!(resumed, Some(serde_json::json!([1, 2])));
}

#[test]
fn failed_commit_leaves_marker_and_blocks_create() {
    let site = Site::new();
    let mut e = site.engine("alice");
    e.create(Metadata::new()).unwrap();
    e.require(&[req("vendor/pkg:1.1.0")], &[]).unwrap();

    site.backend.set_fail_at(Some(FailPoint::Commit));
    let err = e.apply().unwrap_err();
    assert!(matches!(err, CoreError::Runtime(_)), "got {err}");
    assert!(site.marker().exists());
    assert!(!site.root().join("vendor").exists());
    assert_eq!(e.state().unwrap(), Some(StageState::Required));

    site.backend.set_fail_at(None);
    e.destroy(false).unwrap();
    assert!(site.marker().exists(), "destroy must not clear the marker");

    let err = site.engine("bob").create(Metadata::new()).unwrap_err();
    assert!(
        matches!(err, CoreError::FailureMarkerPresent { .. }),
        "got {err}"
    );
    assert!(site.store().current_owner().unwrap().is_none());

    site.marker().clear().unwrap();
    site.engine("bob").create(Metadata::new()).unwrap();
}

#[test]
fn successful_commit_clears_marker() {
    let site = Site::new();
    let mut e = site.engine("alice");
    e.create(Metadata::new()).unwrap();
    e.apply().unwrap();
    assert!(!site.marker().exists());
    assert_eq!(e.state().unwrap(), Some(StageState::Applied));
}

#[test]
fn precreate_error_rolls_back_claim() {
    let site = Site::new();
    let mut bus = HookBus::new();
    bus.subscribe(EventKind::PreCreate, 0, "warns", |e| {
        e.add_warning("just a warning");
        Ok(())
    });
    bus.subscribe(EventKind::PreCreate, 5, "blocks", |e| {
        e.add_error("site is in maintenance");
        Ok(())
    });

    let mut e = site.engine_with("alice", bus);
    let err = e.create(Metadata::new()).unwrap_err();
    let validation = err.validation().expect("validation error");
    assert_eq!(validation.event(), EventKind::PreCreate);
    assert_eq!(validation.results().len(), 2);
    assert_eq!(validation.errors().count(), 1);

    assert!(site.store().current_owner().unwrap().is_none());
    assert!(e.token().is_none());
    assert!(!site
        .backend
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::Begin { .. })));

    site.engine("bob").create(Metadata::new()).unwrap();
}

#[test]
fn warnings_never_abort() {
    let site = Site::new();
    let mut bus = HookBus::new();
    for kind in [EventKind::PreCreate, EventKind::PreRequire, EventKind::PreApply] {
        bus.subscribe(kind, 0, "warns", |e| {
            e.add_warning("disk is getting full");
            Ok(())
        });
    }
    let mut e = site.engine_with("alice", bus);
    e.create(Metadata::new()).unwrap();
    e.require(&[req("vendor/pkg:1.0.0")], &[]).unwrap();
    e.apply().unwrap();
}

#[test]
fn hook_failure_aborts_create_and_rolls_back() {
    let site = Site::new();
    let mut bus = HookBus::new();
    bus.subscribe(EventKind::PreCreate, 0, "explodes", |_e| {
        Err(HookError::failed("explodes", "database unreachable"))
    });
    let mut e = site.engine_with("alice", bus);
    let err = e.create(Metadata::new()).unwrap_err();
    assert!(matches!(err, CoreError::Hook(_)), "got {err}");
    assert!(site.store().current_owner().unwrap().is_none());
}

#[test]
fn begin_failure_rolls_back_claim() {
    let site = Site::new();
    site.backend.set_fail_at(Some(FailPoint::Begin));
    let mut e = site.engine("alice");
    assert!(matches!(
        e.create(Metadata::new()),
        Err(CoreError::Runtime(_))
    ));
    assert!(site.store().current_owner().unwrap().is_none());

    site.backend.set_fail_at(None);
    e.create(Metadata::new()).unwrap();
}

#[test]
fn post_hook_failures_do_not_block() {
    let site = Site::new();
    let mut bus = HookBus::new();
    for kind in [EventKind::PostCreate, EventKind::PostApply, EventKind::PostDestroy] {
        bus.subscribe(kind, 0, "noisy", |e| {
            e.add_error("post hooks cannot block");
            Err(HookError::failed("noisy", "and cannot fail either"))
        });
    }
    let mut e = site.engine_with("alice", bus);
    e.create(Metadata::new()).unwrap();
    e.apply().unwrap();
    e.destroy(false).unwrap();
}

struct Fixed(&'static str, Vec<&'static str>);

impl PathExcluder for Fixed {
    fn name(&self) -> &str {
        self.0
    }

    fn contribute(&self, _event: &StageEvent) -> Vec<ExcludedPath> {
        self.1.iter().map(|p| ExcludedPath::project(*p)).collect()
    }
}

#[test]
fn merged_exclusions_reach_begin_deduplicated() {
    let site = Site::new();
    let mut collector = ExcludedPathCollector::new();
    collector.add_source(Box::new(Fixed("a", vec!["x"])));
    collector.add_source(Box::new(Fixed("b", vec!["y", "x"])));
    let mut bus = HookBus::new();
    bus.add_subscriber(Arc::new(collector));

    let mut e = site.engine_with("alice", bus);
    e.create(Metadata::new()).unwrap();

    let excluded = site
        .backend
        .calls()
        .into_iter()
        .find_map(|c| match c {
            BackendCall::Begin { excluded, .. } => Some(excluded),
            _ => None,
        })
        .unwrap();
    assert_eq!(excluded, vec![PathBuf::from("x"), PathBuf::from("y")]);
}

#[test]
fn apply_merges_create_and_apply_exclusions() {
    let site = Site::new();
    let mut bus = HookBus::new();
    bus.subscribe(EventKind::PreCreate, 0, "create-only", |e| {
        e.exclude_path(ExcludedPath::web("sites/default/files"));
        Ok(())
    });
    bus.subscribe(EventKind::PreApply, 0, "apply-only", |e| {
        e.exclude_path(ExcludedPath::project("private"));
        Ok(())
    });
    let mut e = site.engine_with("alice", bus);
    e.create(Metadata::new()).unwrap();
    e.apply().unwrap();

    let excluded = site
        .backend
        .calls()
        .into_iter()
        .find_map(|c| match c {
            BackendCall::Commit { excluded, .. } => Some(excluded),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        excluded,
        vec![
            PathBuf::from("private"),
            PathBuf::from("web/sites/default/files"),
        ]
    );
}

#[test]
fn require_apply_then_second_apply_fails() {
    let site = Site::new();
    let mut e = site.engine("alice");
    e.create(Metadata::new()).unwrap();
    e.require(&[req("vendor/pkg:1.1.0")], &[]).unwrap();
    e.apply().unwrap();

    let version = fs::read_to_string(site.root().join("vendor/vendor/pkg/VERSION")).unwrap();
    assert_eq!(version, "1.1.0");
    assert!(site.root().join("composer.lock").exists());

    assert!(matches!(
        e.apply(),
        Err(CoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        e.require(&[req("vendor/other:2.0.0")], &[]),
        Err(CoreError::InvalidTransition { .. })
    ));
    e.destroy(false).unwrap();
}

#[test]
fn require_is_reentrant_before_apply() {
    let site = Site::new();
    let mut e = site.engine("alice");
    e.create(Metadata::new()).unwrap();
    e.require(&[req("vendor/a:1.0.0")], &[]).unwrap();
    e.require(&[req("vendor/b:2.0.0")], &[]).unwrap();
    assert_eq!(e.state().unwrap(), Some(StageState::Required));
    e.apply().unwrap();
    assert!(site.root().join("vendor/vendor/a").is_dir());
    assert!(site.root().join("vendor/vendor/b").is_dir());
}

#[test]
fn require_runs_three_calls_in_fixed_order() {
    let site = Site::new();
    let mut e = site.engine("alice");
    let token = e.create(Metadata::new()).unwrap();
    e.require(
        &[req("vendor/a:1.0.0"), req("vendor/b:^2.0")],
        &[req("vendor/test-kit:3.1.0")],
    )
    .unwrap();

    assert_eq!(
        site.backend.stage_calls(),
        vec![
            vec!["require", "--no-update", "vendor/a:1.0.0", "vendor/b:^2.0"],
            vec!["require", "--dev", "--no-update", "vendor/test-kit:3.1.0"],
            vec![
                "update",
                "--with-all-dependencies",
                "vendor/a",
                "vendor/b",
                "vendor/test-kit",
            ],
        ]
    );
    let stage_dir = site.locator.stage_dir(&token);
    assert!(site.backend.calls().iter().all(|c| match c {
        BackendCall::Stage { working_dir, .. } => *working_dir == stage_dir,
        _ => true,
    }));
}

#[test]
fn empty_require_skips_dependency_manager() {
    let site = Site::new();
    let mut e = site.engine("alice");
    e.create(Metadata::new()).unwrap();
    e.require(&[], &[]).unwrap();
    assert!(site.backend.stage_calls().is_empty());
    assert_eq!(e.state().unwrap(), Some(StageState::Required));
}

#[test]
fn process_failure_during_require_leaves_active_untouched() {
    let site = Site::new();
    let mut e = site.engine("alice");
    e.create(Metadata::new()).unwrap();
    site.backend.set_fail_at(Some(FailPoint::Stage));
    assert!(e.require(&[req("vendor/pkg:1.0.0")], &[]).is_err());
    assert!(!site.marker().exists());
    assert_eq!(e.state().unwrap(), Some(StageState::Created));
    assert!(!site.root().join("vendor").exists());
}

#[test]
fn pre_apply_error_prevents_commit_and_marker() {
    let site = Site::new();
    let mut bus = HookBus::new();
    bus.subscribe(EventKind::PreApply, 0, "blocks", |e| {
        e.add_error("not today");
        Ok(())
    });
    let mut e = site.engine_with("alice", bus);
    e.create(Metadata::new()).unwrap();
    let err = e.apply().unwrap_err();
    assert_eq!(err.validation().unwrap().event(), EventKind::PreApply);
    assert!(!site.marker().exists());
    assert!(!site
        .backend
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::Commit { .. })));
}

#[test]
fn force_destroy_by_non_owner_clears_record() {
    let site = Site::new();
    let mut alice = site.engine("alice");
    let token = alice.create(Metadata::new()).unwrap();

    let mut bob = site.engine("bob");
    assert!(!site.store().is_owned_by(&OwnerId::new("bob")).unwrap());
    assert!(matches!(
        bob.destroy(false),
        Err(CoreError::Ownership { .. })
    ));
    assert!(site.store().current_owner().unwrap().is_some());

    bob.destroy(true).unwrap();
    assert!(site.store().current_owner().unwrap().is_none());
    assert!(!site.locator.stage_dir(&token).exists());

    let err = alice.apply().unwrap_err();
    match err {
        CoreError::Ownership { reason } => assert!(reason.contains("force"), "{reason}"),
        other => panic!("expected Ownership, got {other}"),
    }
    assert!(matches!(
        site.engine("alice").claim(&token),
        Err(CoreError::Ownership { .. })
    ));
    alice.destroy(false).unwrap();
}

#[test]
fn operations_by_non_owner_fail() {
    let site = Site::new();
    let mut alice = site.engine("alice");
    let token = alice.create(Metadata::new()).unwrap();

    let mut bob = site.engine("bob");
    assert!(matches!(bob.claim(&token), Err(CoreError::Ownership { .. })));
    assert!(matches!(bob.apply(), Err(CoreError::Ownership { .. })));
    assert!(matches!(
        bob.set_metadata("k", serde_json::json!(1)),
        Err(CoreError::Ownership { .. })
    ));
}

#[test]
fn claim_resumes_stage_in_new_engine() {
    let site = Site::new();
    let token = site.engine("alice").create(Metadata::new()).unwrap();

    let mut later = site.engine("alice");
    later.claim(&token).unwrap();
    later.require(&[req("vendor/pkg:1.0.0")], &[]).unwrap();
    later.apply().unwrap();
    later.destroy(false).unwrap();
    assert!(site.root().join("vendor/vendor/pkg").is_dir());
}

#[test]
fn concurrent_creates_have_one_winner() {
    let site = Arc::new(Site::new());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let site = Arc::clone(&site);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut e = site.engine(&format!("owner-{i}"));
                barrier.wait();
                e.create(Metadata::new())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, CoreError::StageBusy { .. })));
}

#[test]
fn status_tracks_lifecycle() {
    let site = Site::new();
    let mut e = site.engine("alice");
    assert!(e.status().unwrap().available);

    let token = e.create(Metadata::new()).unwrap();
    let s = e.status().unwrap();
    assert!(!s.available);
    assert_eq!(s.token.as_deref(), Some(token.as_str()));
    assert_eq!(s.owner_id.as_deref(), Some("alice"));
    assert_eq!(s.state, Some(StageState::Created));
    assert_eq!(s.finalized, Some(true));
    assert!(s.failure_marker.is_none());

    e.destroy(false).unwrap();
    assert!(e.status().unwrap().available);
}

fn configured_engine(root: &Path, staging: &Path, owner: &str) -> StageEngine {
    let config = parse_config_str(&format!(
        r#"
config_version = 1
[site]
id = "configured"
[paths]
project_root = "{}"
web_root = "web"
staging_root = "{}"
[runtime]
backend = "mock"
[exclusions]
web = ["sites/default/files"]
[validation]
min_free_mb = 0
"#,
        root.display(),
        staging.display()
    ))
    .unwrap();
    StageEngine::from_config(&config, OwnerId::new(owner)).unwrap()
}

fn configured_project() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("app");
    let files = root.join("web/sites/default/files");
    fs::create_dir_all(&files).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    fs::write(files.join("upload.jpg"), "jpeg").unwrap();
    fs::write(root.join("composer.json"), r#"{"require": {}}"#).unwrap();
    fs::write(root.join("composer.lock"), r#"{"packages": []}"#).unwrap();
    let staging = dir.path().join("stages");
    (dir, root, staging)
}

#[test]
fn builtin_exclusions_protect_active_only_paths() {
    let (_dir, root, staging) = configured_project();
    let mut e = configured_engine(&root, &staging, "alice");
    let token = e.create(Metadata::new()).unwrap();

    let stage_dir = e.locator().stage_dir(&token);
    assert!(stage_dir.join("composer.json").exists());
    assert!(!stage_dir.join(".git").exists());
    assert!(!stage_dir.join("web/sites/default/files").exists());
    assert!(!stage_dir.join(".stagehand").exists());

    // Written after the copy; a mirror commit must not delete it.
    fs::write(root.join("web/sites/default/files/late.jpg"), "jpeg").unwrap();

    e.require(&[req("vendor/pkg:1.1.0")], &[]).unwrap();
    e.apply().unwrap();
    assert!(root.join("vendor/vendor/pkg/VERSION").exists());
    assert!(root.join(".git/HEAD").exists());
    assert!(root.join("web/sites/default/files/upload.jpg").exists());
    assert!(root.join("web/sites/default/files/late.jpg").exists());
    assert!(root.join(".stagehand/ownership.json").exists());
    e.destroy(false).unwrap();
}

#[test]
fn outside_lock_file_change_blocks_apply() {
    let (_dir, root, staging) = configured_project();
    let mut e = configured_engine(&root, &staging, "alice");
    e.create(Metadata::new()).unwrap();
    assert!(e.get_metadata("lock_file_hash").unwrap().is_some());

    fs::write(root.join("composer.lock"), r#"{"packages": [{"name": "x"}]}"#).unwrap();
    let err = e.apply().unwrap_err();
    assert_eq!(err.validation().unwrap().event(), EventKind::PreApply);
    assert!(!e.locator().failure_marker_file().exists());
}

#[test]
fn status_check_reports_marker_without_blocking() {
    let (_dir, root, staging) = configured_project();
    let e = configured_engine(&root, &staging, "alice");
    assert!(e.status_check().unwrap().iter().all(|r| !r.is_error()));

    e.failure_marker()
        .write(&stagehand_schema::StageToken::new("t"), e.owner(), None)
        .unwrap();
    let results = e.status_check().unwrap();
    assert!(results.iter().any(|r| r.is_error()));
}
