use crate::backend::StageBackend;
use crate::sync::{sync_tree, SyncMode};
use crate::RuntimeError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A recorded collaborator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Begin {
        src: PathBuf,
        dest: PathBuf,
        excluded: Vec<PathBuf>,
    },
    Stage {
        args: Vec<String>,
        working_dir: PathBuf,
    },
    Commit {
        src: PathBuf,
        dest: PathBuf,
        excluded: Vec<PathBuf>,
    },
    Discard(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    Stage,
    Commit,
    Discard,
}

impl FailPoint {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "begin" => Some(FailPoint::Begin),
            "stage" => Some(FailPoint::Stage),
            "commit" => Some(FailPoint::Commit),
            "discard" => Some(FailPoint::Discard),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailPoint::Begin => write!(f, "begin"),
            FailPoint::Stage => write!(f, "stage"),
            FailPoint::Commit => write!(f, "commit"),
            FailPoint::Discard => write!(f, "discard"),
        }
    }
}

/// In-process stand-in for the dependency manager.
///
/// Trees are really copied, so engine tests observe genuine file effects.
/// `require` writes `vendor/<name>/VERSION` and records the constraint in
/// `composer.json`; `update` regenerates `composer.lock` from it.
pub struct MockBackend {
    calls: Mutex<Vec<BackendCall>>,
    fail_at: Mutex<Option<FailPoint>>,
    commit_delay: Duration,
    available: AtomicBool,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_at: Mutex::new(None),
            commit_delay: Duration::ZERO,
            available: AtomicBool::new(true),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure from `STAGEHAND_MOCK_FAIL` (`begin`/`stage`/`commit`/`discard`),
    /// `STAGEHAND_MOCK_COMMIT_DELAY_MS` and `STAGEHAND_MOCK_UNAVAILABLE`.
    pub fn from_env() -> Self {
        let mut backend = Self::new();
        if let Some(point) = std::env::var("STAGEHAND_MOCK_FAIL")
            .ok()
            .and_then(|v| FailPoint::parse(&v))
        {
            backend = backend.failing_at(point);
        }
        if let Some(ms) = std::env::var("STAGEHAND_MOCK_COMMIT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            backend = backend.with_commit_delay(Duration::from_millis(ms));
        }
        if std::env::var_os("STAGEHAND_MOCK_UNAVAILABLE").is_some() {
            backend.set_available(false);
        }
        backend
    }

    #[must_use]
    pub fn failing_at(self, point: FailPoint) -> Self {
        self.set_fail_at(Some(point));
        self
    }

    #[must_use]
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    pub fn set_fail_at(&self, point: Option<FailPoint>) {
        *self.fail_at.lock().unwrap_or_else(PoisonError::into_inner) = point;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the `Stage` calls, as argument lists.
    pub fn stage_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Stage { args, .. } => Some(args),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: BackendCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn check_fail(&self, point: FailPoint) -> Result<(), RuntimeError> {
        let fail_at = *self.fail_at.lock().unwrap_or_else(PoisonError::into_inner);
        if fail_at == Some(point) {
            return Err(RuntimeError::Injected(point.to_string()));
        }
        Ok(())
    }
}

fn read_manifest(working_dir: &Path) -> Result<serde_json::Value, RuntimeError> {
    let path = working_dir.join("composer.json");
    if !path.exists() {
        return Ok(serde_json::json!({}));
    }
    let content = fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map_err(|e| RuntimeError::SyncFailed(format!("invalid composer.json: {e}")))
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), RuntimeError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| RuntimeError::SyncFailed(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}

fn mock_require(args: &[String], working_dir: &Path) -> Result<(), RuntimeError> {
    let section = if args.iter().any(|a| a == "--dev") {
        "require-dev"
    } else {
        "require"
    };
    let mut manifest = read_manifest(working_dir)?;
    for spec in args.iter().skip(1).filter(|a| !a.starts_with("--")) {
        let (name, constraint) = spec.split_once(':').unwrap_or((spec.as_str(), "*"));
        let pkg_dir = working_dir.join("vendor").join(name);
        fs::create_dir_all(&pkg_dir)?;
        fs::write(pkg_dir.join("VERSION"), constraint)?;
        if let Some(obj) = manifest.as_object_mut() {
            let entry = obj
                .entry(section)
                .or_insert_with(|| serde_json::json!({}));
            if let Some(map) = entry.as_object_mut() {
                map.insert(name.to_owned(), serde_json::json!(constraint));
            }
        }
    }
    write_json(&working_dir.join("composer.json"), &manifest)
}

fn mock_update(working_dir: &Path) -> Result<(), RuntimeError> {
    let manifest = read_manifest(working_dir)?;
    let mut packages = Vec::new();
    for section in ["require", "require-dev"] {
        if let Some(map) = manifest.get(section).and_then(|v| v.as_object()) {
            for (name, version) in map {
                packages.push(serde_json::json!({ "name": name, "version": version }));
            }
        }
    }
    write_json(
        &working_dir.join("composer.lock"),
        &serde_json::json!({ "packages": packages }),
    )
}

impl StageBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn begin(
        &self,
        src: &Path,
        dest: &Path,
        excluded: &[PathBuf],
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.record(BackendCall::Begin {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            excluded: excluded.to_vec(),
        });
        self.check_fail(FailPoint::Begin)?;
        sync_tree(src, dest, excluded, SyncMode::Copy, timeout)?;
        Ok(())
    }

    fn stage(
        &self,
        args: &[String],
        working_dir: &Path,
        _timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.record(BackendCall::Stage {
            args: args.to_vec(),
            working_dir: working_dir.to_path_buf(),
        });
        self.check_fail(FailPoint::Stage)?;
        match args.first().map(String::as_str) {
            Some("require") => mock_require(args, working_dir),
            Some("update") => mock_update(working_dir),
            _ => Ok(()),
        }
    }

    fn commit(
        &self,
        src: &Path,
        dest: &Path,
        excluded: &[PathBuf],
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.record(BackendCall::Commit {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            excluded: excluded.to_vec(),
        });
        if !self.commit_delay.is_zero() {
            std::thread::sleep(self.commit_delay);
        }
        self.check_fail(FailPoint::Commit)?;
        sync_tree(src, dest, excluded, SyncMode::Mirror, timeout)?;
        Ok(())
    }

    fn discard(&self, stage_dir: &Path) -> Result<(), RuntimeError> {
        self.record(BackendCall::Discard(stage_dir.to_path_buf()));
        self.check_fail(FailPoint::Discard)?;
        if stage_dir.exists() {
            fs::remove_dir_all(stage_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(60);

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn mock_records_calls_in_order() {
        let active = tempfile::tempdir().unwrap();
        let stages = tempfile::tempdir().unwrap();
        let stage = stages.path().join("tok");
        let backend = MockBackend::new();

        backend.begin(active.path(), &stage, &[], T).unwrap();
        backend
            .stage(&args(&["require", "--no-update", "a/b:1.0"]), &stage, T)
            .unwrap();
        backend.commit(&stage, active.path(), &[], T).unwrap();
        backend.discard(&stage).unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(calls[0], BackendCall::Begin { .. }));
        assert!(matches!(calls[1], BackendCall::Stage { .. }));
        assert!(matches!(calls[2], BackendCall::Commit { .. }));
        assert_eq!(calls[3], BackendCall::Discard(stage.clone()));
        assert!(!stage.exists());
    }

    #[test]
    fn require_and_update_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new();
        backend
            .stage(&args(&["require", "--no-update", "vendor/pkg:1.1.0"]), dir.path(), T)
            .unwrap();
        backend
            .stage(&args(&["require", "--dev", "--no-update", "vendor/tool:2.0"]), dir.path(), T)
            .unwrap();
        backend
            .stage(
                &args(&["update", "--with-all-dependencies", "vendor/pkg", "vendor/tool"]),
                dir.path(),
                T,
            )
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("vendor/vendor/pkg/VERSION")).unwrap(),
            "1.1.0"
        );
        let manifest = read_manifest(dir.path()).unwrap();
        assert_eq!(manifest["require"]["vendor/pkg"], "1.1.0");
        assert_eq!(manifest["require-dev"]["vendor/tool"], "2.0");

        let lock: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("composer.lock")).unwrap())
                .unwrap();
        assert_eq!(lock["packages"].as_array().unwrap().len(), 2);
        assert_eq!(backend.stage_calls().len(), 3);
    }

    #[test]
    fn injected_failure_still_records_call() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new().failing_at(FailPoint::Commit);
        let err = backend
            .commit(dir.path(), &dir.path().join("out"), &[], T)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Injected(_)));
        assert_eq!(backend.calls().len(), 1);
        assert!(!dir.path().join("out").exists());

        backend.set_fail_at(None);
        backend
            .commit(dir.path(), &dir.path().join("out"), &[PathBuf::from("out")], T)
            .unwrap();
    }

    #[test]
    fn availability_is_switchable() {
        let backend = MockBackend::new();
        assert!(backend.available());
        backend.set_available(false);
        assert!(!backend.available());
    }
}
