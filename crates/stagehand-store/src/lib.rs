//! Durable bookkeeping for Stagehand: path resolution, stage ownership, and the
//! failure marker.
//!
//! This crate provides the storage layer: `PathLocator` for resolving the
//! project, web, vendor, staging, and state directories; `OwnershipStore`, the
//! compare-and-set record of which stage instance owns the one staging area;
//! `FailureMarker`, the sentinel proving a commit was interrupted; and
//! `StoreLock`, the advisory file lock that makes claims atomic across
//! processes. Every write goes through a temp file, `fsync`, and rename.

pub mod lock;
pub mod locator;
pub mod marker;
pub mod ownership;

pub use lock::StoreLock;
pub use locator::PathLocator;
pub use marker::{FailureMarker, MarkerRecord};
pub use ownership::{Metadata, OwnershipRecord, OwnershipStore, StageState, Tombstone};

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `content` to `dest` atomically: temp file in the same directory,
/// `sync_all`, rename, then fsync the directory.
pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidPath(dest.to_path_buf()))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("integrity check failed for '{path}': expected {expected}, got {actual}")]
    IntegrityFailure {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("stage is already owned by '{owner_id}' (token {token})")]
    AlreadyOwned { owner_id: String, token: String },
    #[error("stage is not owned by '{caller}'")]
    NotOwner { caller: String },
    #[error("no stage exists")]
    NoStage,
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("project root does not exist or is not a directory: {}", .0.display())]
    MissingProjectRoot(PathBuf),
    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),
}
