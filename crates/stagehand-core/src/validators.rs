//! Built-in validators subscribed to the hook bus.

use crate::events::{EventKind, StageEvent};
use crate::excluder::ExcludedPathCollector;
use crate::hooks::{HookBus, HookError, StageSubscriber};
use stagehand_runtime::StageBackend;
use stagehand_schema::{StagehandConfig, ValidationResult};
use stagehand_store::FailureMarker;
use std::path::Path;
use std::sync::Arc;

/// Metadata key holding the blake3 hash of `composer.lock` at create time.
pub const LOCK_HASH_KEY: &str = "lock_file_hash";

const ABSENT: &str = "absent";

/// Reports a failure marker on the status surface. `create` and `apply`
/// refuse on their own; this makes the condition visible before anyone tries.
pub struct FailureMarkerValidator;

impl StageSubscriber for FailureMarkerValidator {
    fn name(&self) -> &'static str {
        "failure-marker"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![(EventKind::StatusCheck, -50)]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        let marker = FailureMarker::new(event.locator());
        if let Some(record) = marker.read()? {
            event.add_error(format!(
                "{} (failure marker: {})",
                record.message,
                marker.path().display()
            ));
        }
        Ok(())
    }
}

pub struct BackendAvailableValidator {
    backend: Arc<dyn StageBackend>,
}

impl BackendAvailableValidator {
    pub fn new(backend: Arc<dyn StageBackend>) -> Self {
        Self { backend }
    }
}

impl StageSubscriber for BackendAvailableValidator {
    fn name(&self) -> &'static str {
        "backend-available"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![(EventKind::PreCreate, -10), (EventKind::StatusCheck, -10)]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        if !self.backend.available() {
            event.add_error(format!(
                "The '{}' dependency manager is not available.",
                self.backend.name()
            ));
        }
        Ok(())
    }
}

/// The project root must contain `composer.json`.
pub struct ProjectRootValidator;

impl StageSubscriber for ProjectRootValidator {
    fn name(&self) -> &'static str {
        "project-root"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![(EventKind::PreCreate, 0), (EventKind::StatusCheck, 0)]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        let root = event.locator().project_root();
        if !root.join("composer.json").is_file() {
            let msg = format!("No composer.json found in the project root {}.", root.display());
            event.add_error(msg);
        }
        Ok(())
    }
}

fn lock_file_hash(project_root: &Path) -> Result<String, HookError> {
    let path = project_root.join("composer.lock");
    match std::fs::read(&path) {
        Ok(bytes) => Ok(blake3::hash(&bytes).to_hex().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ABSENT.to_owned()),
        Err(e) => Err(e.into()),
    }
}

/// Detects changes to the active `composer.lock` made outside the stage
/// after it was created.
pub struct LockFileValidator;

impl StageSubscriber for LockFileValidator {
    fn name(&self) -> &'static str {
        "lock-file"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![
            (EventKind::PreCreate, 50),
            (EventKind::PreRequire, 0),
            (EventKind::PreApply, 0),
            (EventKind::StatusCheck, 0),
        ]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        let current = lock_file_hash(event.locator().project_root())?;
        if event.kind() == EventKind::PreCreate {
            event.set_metadata(LOCK_HASH_KEY, serde_json::json!(current));
            return Ok(());
        }

        let Some(stored) = event.get_metadata(LOCK_HASH_KEY).and_then(|v| v.as_str()) else {
            if event.token().is_some() {
                event.add_warning("No stored lock file hash; cannot detect outside changes.");
            }
            return Ok(());
        };
        if stored != current {
            let message = if current == ABSENT {
                "composer.lock was removed from the active directory since the stage was created."
            } else {
                "composer.lock in the active directory changed since the stage was created."
            };
            event.add_error(message);
        }
        Ok(())
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn is_writable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;
    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| !m.permissions().readonly())
}

pub struct WritableDirectoryValidator;

impl StageSubscriber for WritableDirectoryValidator {
    fn name(&self) -> &'static str {
        "writable-directories"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![
            (EventKind::PreCreate, 0),
            (EventKind::PreApply, 0),
            (EventKind::StatusCheck, 0),
        ]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        let locator = event.locator();
        let mut messages = Vec::new();
        let root = locator.project_root().to_path_buf();
        if root.is_dir() && !is_writable(&root) {
            messages.push(format!("The project root {} is not writable.", root.display()));
        }
        let vendor = locator.vendor_directory();
        if vendor.is_dir() && !is_writable(&vendor) {
            messages.push(format!(
                "The vendor directory {} is not writable.",
                vendor.display()
            ));
        }
        match messages.len() {
            0 => {}
            1 => event.add_error(messages.remove(0)),
            _ => {
                if let Ok(result) =
                    ValidationResult::errors(messages, "The active directory is not writable.")
                {
                    event.add_result(result);
                }
            }
        }
        Ok(())
    }
}

/// The staging root must not live inside the project: every stage would
/// otherwise be copied into itself.
pub struct StagingRootValidator;

impl StageSubscriber for StagingRootValidator {
    fn name(&self) -> &'static str {
        "staging-root"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![(EventKind::PreCreate, 0), (EventKind::StatusCheck, 0)]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        let locator = event.locator();
        if locator.staging_root().starts_with(locator.project_root()) {
            let msg = format!(
                "The staging root {} is inside the project root {}.",
                locator.staging_root().display(),
                locator.project_root().display()
            );
            event.add_error(msg);
        }
        Ok(())
    }
}

/// Closest existing ancestor, so free space can be measured for a staging
/// root that has not been created yet.
fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

pub struct DiskSpaceValidator {
    min_free_mb: u64,
}

impl DiskSpaceValidator {
    pub fn new(min_free_mb: u64) -> Self {
        Self { min_free_mb }
    }
}

impl StageSubscriber for DiskSpaceValidator {
    fn name(&self) -> &'static str {
        "disk-space"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![(EventKind::PreCreate, 10), (EventKind::StatusCheck, 10)]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        if self.min_free_mb == 0 {
            return Ok(());
        }
        let locator = event.locator().clone();
        let needed = self.min_free_mb.saturating_mul(1024 * 1024);
        let mut messages = Vec::new();
        for (label, path) in [
            ("project root", locator.project_root()),
            ("staging root", locator.staging_root()),
        ] {
            let Some(existing) = existing_ancestor(path) else {
                continue;
            };
            let free = fs2::available_space(existing)?;
            if free < needed {
                messages.push(format!(
                    "The {label} {} has {} MB free; {} MB required.",
                    path.display(),
                    free / (1024 * 1024),
                    self.min_free_mb
                ));
            }
        }
        match messages.len() {
            0 => {}
            1 => event.add_error(messages.remove(0)),
            _ => {
                if let Ok(result) = ValidationResult::errors(messages, "Not enough free disk space.")
                {
                    event.add_result(result);
                }
            }
        }
        Ok(())
    }
}

/// Register the excluded-path collector and every built-in validator.
pub fn register_builtin(
    bus: &mut HookBus,
    config: &StagehandConfig,
    backend: Arc<dyn StageBackend>,
) {
    bus.add_subscriber(Arc::new(ExcludedPathCollector::with_builtin_sources(
        config.exclusions.project.clone(),
        config.exclusions.web.clone(),
    )));
    bus.add_subscriber(Arc::new(FailureMarkerValidator));
    bus.add_subscriber(Arc::new(BackendAvailableValidator::new(backend)));
    bus.add_subscriber(Arc::new(ProjectRootValidator));
    bus.add_subscriber(Arc::new(LockFileValidator));
    bus.add_subscriber(Arc::new(WritableDirectoryValidator));
    bus.add_subscriber(Arc::new(StagingRootValidator));
    bus.add_subscriber(Arc::new(DiskSpaceValidator::new(
        config.validation.min_free_mb,
    )));
}
