//! Stage life-cycle engine for Stagehand.
//!
//! This crate ties the schema, store, and runtime crates together into the
//! `StageEngine`: create a staging copy of the active directory, run the
//! dependency manager inside it, and sync it back, with every transition
//! gated by ownership and by the validation hook bus. It also provides the
//! excluded-path collector, built-in validators, the `PackageUpdater` that
//! drives the engine for version upgrades, and signal handling.

pub mod concurrency;
pub mod engine;
pub mod events;
pub mod excluder;
pub mod hooks;
pub mod lifecycle;
pub mod updater;
pub mod validators;

pub use concurrency::{install_signal_handler, request_shutdown, shutdown_requested};
pub use engine::{EngineOptions, StageEngine, StageStatus};
pub use events::{EventKind, StageEvent};
pub use excluder::{
    ConfiguredPathsExcluder, ExcludedPath, ExcludedPathCollector, ExcludedPathSet, GitExcluder,
    NodeModulesExcluder, PathExcluder, StagingRootExcluder, StateDirExcluder,
};
pub use hooks::{HookBus, HookError, HookFn, StageSubscriber};
pub use lifecycle::validate_transition;
pub use updater::{PackageUpdater, PACKAGE_VERSIONS_KEY};
pub use validators::register_builtin;

use stagehand_runtime::RuntimeError;
use stagehand_schema::ValidationResult;
use thiserror::Error;

/// One or more error results from a pre-* event, with the event that
/// produced them.
#[derive(Debug, Clone, Error)]
#[error("{event} validation failed: {}", summarize(.results))]
pub struct StageValidationError {
    event: EventKind,
    results: Vec<ValidationResult>,
}

fn summarize(results: &[ValidationResult]) -> String {
    results
        .iter()
        .filter(|r| r.is_error())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StageValidationError {
    pub fn new(event: EventKind, results: Vec<ValidationResult>) -> Self {
        Self { event, results }
    }

    pub fn event(&self) -> EventKind {
        self.event
    }

    /// Every result collected during the event, warnings included, in
    /// dispatch order.
    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_error())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("stage is busy: owned by '{owner_id}' (token {token})")]
    StageBusy { owner_id: String, token: String },
    #[error("ownership error: {reason}")]
    Ownership { reason: String },
    #[error(transparent)]
    Validation(#[from] StageValidationError),
    #[error("dependency manager failed: {0}")]
    ProcessFailure(#[source] RuntimeError),
    #[error("runtime error: {0}")]
    Runtime(#[source] RuntimeError),
    #[error("failure marker present: {message}")]
    FailureMarkerPresent { message: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("{0}")]
    Hook(#[from] HookError),
    #[error("store error: {0}")]
    Store(#[from] stagehand_store::StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] stagehand_schema::ConfigError),
    #[error("schema error: {0}")]
    Schema(#[from] stagehand_schema::SchemaError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("shutdown requested; refusing to start a new apply")]
    ShutdownRequested,
}

impl From<RuntimeError> for CoreError {
    fn from(e: RuntimeError) -> Self {
        if e.is_process_failure() {
            CoreError::ProcessFailure(e)
        } else {
            CoreError::Runtime(e)
        }
    }
}

impl CoreError {
    pub(crate) fn ownership(reason: impl Into<String>) -> Self {
        CoreError::Ownership {
            reason: reason.into(),
        }
    }

    pub fn validation(&self) -> Option<&StageValidationError> {
        match self {
            CoreError::Validation(v) => Some(v),
            _ => None,
        }
    }
}
