use crate::locator::PathLocator;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use stagehand_schema::{OwnerId, StageToken};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub const DEFAULT_MARKER_MESSAGE: &str = "Staged changes failed to apply to the active directory. \
     The active directory may be in an inconsistent state; restore it from a backup \
     and then clear the failure marker.";

/// Contents of the failure marker file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkerRecord {
    pub message: String,
    pub stage_token: StageToken,
    pub owner_id: OwnerId,
    pub written_at: String,
}

/// Sentinel written immediately before the active directory is modified and
/// removed only after the modification returns. Its presence on disk proves
/// a commit was interrupted; nothing in the engine clears it automatically.
pub struct FailureMarker {
    path: PathBuf,
}

impl FailureMarker {
    pub fn new(locator: &PathLocator) -> Self {
        Self {
            path: locator.failure_marker_file(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Durably write the marker. Returns only after the file and its parent
    /// directory have been synced.
    pub fn write(
        &self,
        token: &StageToken,
        owner: &OwnerId,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let record = MarkerRecord {
            message: message.unwrap_or(DEFAULT_MARKER_MESSAGE).to_owned(),
            stage_token: token.clone(),
            owner_id: owner.clone(),
            written_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_string_pretty(&record)?;
        write_atomic(&self.path, content.as_bytes())?;
        info!("failure marker written for stage {token}");
        Ok(())
    }

    /// Remove the marker. A missing marker is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                if let Some(dir) = self.path.parent() {
                    crate::fsync_dir(dir)?;
                }
                info!("failure marker cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the marker. A marker that exists but cannot be parsed is still a
    /// marker: the returned record carries a generic message instead.
    pub fn read(&self) -> Result<Option<MarkerRecord>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("unreadable failure marker {}: {e}", self.path.display());
                Ok(Some(MarkerRecord {
                    message: DEFAULT_MARKER_MESSAGE.to_owned(),
                    stage_token: StageToken::new("unknown"),
                    owner_id: OwnerId::new("unknown"),
                    written_at: String::new(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_schema::SiteId;

    fn test_marker() -> (tempfile::TempDir, FailureMarker) {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathLocator::new(SiteId::new("test"), dir.path().join("app"))
            .with_state_dir(dir.path().join("state"));
        let marker = FailureMarker::new(&locator);
        (dir, marker)
    }

    #[test]
    fn absent_by_default() {
        let (_dir, marker) = test_marker();
        assert!(!marker.exists());
        assert!(marker.read().unwrap().is_none());
    }

    #[test]
    fn write_then_read() {
        let (_dir, marker) = test_marker();
        let token = StageToken::new("0123456789abcdef0123456789abcdef");
        marker
            .write(&token, &OwnerId::new("alice"), None)
            .unwrap();
        assert!(marker.exists());
        let record = marker.read().unwrap().unwrap();
        assert_eq!(record.stage_token, token);
        assert_eq!(record.owner_id, OwnerId::new("alice"));
        assert!(record.message.contains("backup"));
    }

    #[test]
    fn custom_message_is_kept() {
        let (_dir, marker) = test_marker();
        marker
            .write(&StageToken::new("t"), &OwnerId::new("o"), Some("disk full"))
            .unwrap();
        assert_eq!(marker.read().unwrap().unwrap().message, "disk full");
    }

    #[test]
    fn clear_is_idempotent() {
        let (_dir, marker) = test_marker();
        marker.clear().unwrap();
        marker
            .write(&StageToken::new("t"), &OwnerId::new("o"), None)
            .unwrap();
        marker.clear().unwrap();
        assert!(!marker.exists());
        marker.clear().unwrap();
    }

    #[test]
    fn corrupt_marker_still_counts() {
        let (dir, marker) = test_marker();
        fs::create_dir_all(dir.path().join("state")).unwrap();
        fs::write(marker.path(), "{ not json").unwrap();
        let record = marker.read().unwrap().unwrap();
        assert_eq!(record.message, DEFAULT_MARKER_MESSAGE);
    }
}
