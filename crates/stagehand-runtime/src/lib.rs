//! Dependency-manager collaborators for Stagehand stages.
//!
//! This crate implements the file-and-process layer the engine delegates to:
//! the pluggable `StageBackend` trait (begin, stage, commit, discard), the
//! `ComposerBackend` that shells out to the dependency manager, an in-process
//! `MockBackend` with failure injection, a subprocess runner with timeouts,
//! the tree syncer that copies between active and staging directories, and
//! prerequisite probes.

pub mod backend;
pub mod composer;
pub mod mock;
pub mod prereq;
pub mod process;
pub mod sync;

pub use backend::{select_backend, StageBackend};
pub use composer::ComposerBackend;
pub use mock::{BackendCall, FailPoint, MockBackend};
pub use prereq::{check_backend_prereqs, command_exists, format_missing, MissingPrereq};
pub use process::{run_process, ProcessOutput};
pub use sync::{rsync_tree, sync_tree, SyncMode, SyncStats};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("command '{command}' failed with status {status}\n{stderr}")]
    ProcessFailed {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("sync failed: {0}")]
    SyncFailed(String),
    #[error("injected failure at {0}")]
    Injected(String),
}

impl RuntimeError {
    /// Captured (stdout, stderr) for process-level failures.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            RuntimeError::ProcessFailed { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }

    /// Whether the error came from a dependency-manager invocation rather
    /// than local I/O.
    pub fn is_process_failure(&self) -> bool {
        matches!(
            self,
            RuntimeError::ProcessFailed { .. }
                | RuntimeError::Timeout { .. }
                | RuntimeError::ExecutableNotFound(_)
                | RuntimeError::Injected(_)
        )
    }
}
