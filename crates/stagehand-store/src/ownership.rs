use crate::lock::StoreLock;
use crate::locator::PathLocator;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use stagehand_schema::{OwnerId, StageToken};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Free-form data attached to a stage by its creator and by validators.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Persisted life-cycle position of the owned stage. The absence of a record
/// is the "unclaimed" state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Created,
    Required,
    Applied,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageState::Created => write!(f, "created"),
            StageState::Required => write!(f, "required"),
            StageState::Applied => write!(f, "applied"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnershipRecord {
    pub owner_id: OwnerId,
    pub token: StageToken,
    pub created_at: String,
    pub updated_at: String,
    /// `false` while the claim is speculative (pre-create validation running).
    pub finalized: bool,
    pub state: StageState,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl OwnershipRecord {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn is_held_by(&self, owner: &OwnerId, token: &StageToken) -> bool {
        self.owner_id == *owner && self.token == *token
    }
}

/// Left behind when a stage is destroyed by someone other than its owner, so
/// the original owner gets a meaningful error instead of "no stage".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tombstone {
    pub token: StageToken,
    pub reason: String,
    pub destroyed_at: String,
}

/// Durable record of which stage instance, if any, owns the staging area.
///
/// Claims are compare-and-set under an exclusive file lock: read, check for
/// absence, write. Readers never take the lock; every write is an atomic
/// rename, so a reader sees either the old or the new record.
pub struct OwnershipStore {
    locator: PathLocator,
}

impl OwnershipStore {
    pub fn new(locator: PathLocator) -> Self {
        Self { locator }
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.locator.ownership_lock())
    }

    fn load(&self) -> Result<Option<OwnershipRecord>, StoreError> {
        let path = self.locator.ownership_file();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: OwnershipRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    path: path.display().to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(record))
    }

    fn save(&self, record: &OwnershipRecord) -> Result<(), StoreError> {
        let mut with_checksum = record.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;
        write_atomic(&self.locator.ownership_file(), content.as_bytes())
    }

    fn remove_file(&self) -> Result<(), StoreError> {
        let path = self.locator.ownership_file();
        if path.exists() {
            fs::remove_file(&path)?;
            crate::fsync_dir(self.locator.state_dir())?;
        }
        Ok(())
    }

    /// Load the record and require that `owner`/`token` hold it.
    fn load_held(
        &self,
        owner: &OwnerId,
        token: &StageToken,
    ) -> Result<OwnershipRecord, StoreError> {
        let record = self.load()?.ok_or(StoreError::NoStage)?;
        if !record.is_held_by(owner, token) {
            return Err(StoreError::NotOwner {
                caller: owner.to_string(),
            });
        }
        Ok(record)
    }

    /// Atomically claim the staging area. Succeeds only when no record
    /// exists. The claim starts out speculative (`finalized = false`) and
    /// carries `metadata` so pre-create validators can read it.
    pub fn try_claim(&self, owner: &OwnerId, metadata: Metadata) -> Result<StageToken, StoreError> {
        let _guard = self.lock()?;
        if let Some(existing) = self.load()? {
            return Err(StoreError::AlreadyOwned {
                owner_id: existing.owner_id.to_string(),
                token: existing.token.to_string(),
            });
        }

        let token = StageToken::generate(self.locator.site_id(), owner);
        let now = chrono::Utc::now().to_rfc3339();
        let record = OwnershipRecord {
            owner_id: owner.clone(),
            token: token.clone(),
            created_at: now.clone(),
            updated_at: now,
            finalized: false,
            state: StageState::Created,
            excluded_paths: Vec::new(),
            metadata,
            checksum: None,
        };
        self.save(&record)?;
        debug!("speculative claim by {owner} (token={token})");
        Ok(token)
    }

    /// Turn a speculative claim into a final one, replacing its metadata and
    /// recording the paths excluded when the stage was copied.
    pub fn finalize(
        &self,
        owner: &OwnerId,
        token: &StageToken,
        metadata: Metadata,
        excluded_paths: Vec<String>,
    ) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut record = self.load_held(owner, token)?;
        record.finalized = true;
        record.metadata = metadata;
        record.excluded_paths = excluded_paths;
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.save(&record)?;
        info!("stage {token} claimed by {owner}");
        Ok(())
    }

    pub fn current_owner(&self) -> Result<Option<OwnershipRecord>, StoreError> {
        self.load()
    }

    pub fn is_owned_by(&self, owner: &OwnerId) -> Result<bool, StoreError> {
        Ok(self.load()?.is_some_and(|r| r.owner_id == *owner))
    }

    /// Clear the record unconditionally. Returns what was removed.
    pub fn release(&self) -> Result<Option<OwnershipRecord>, StoreError> {
        let _guard = self.lock()?;
        let previous = self.load().unwrap_or_else(|e| {
            tracing::warn!("releasing unreadable ownership record: {e}");
            None
        });
        self.remove_file()?;
        if let Some(ref p) = previous {
            debug!("released stage {} held by {}", p.token, p.owner_id);
        }
        Ok(previous)
    }

    /// Release only if `owner`/`token` still hold the claim. Used to roll back
    /// a speculative claim without touching a record that was replaced.
    pub fn release_claim(&self, owner: &OwnerId, token: &StageToken) -> Result<bool, StoreError> {
        let _guard = self.lock()?;
        match self.load()? {
            Some(r) if r.is_held_by(owner, token) => {
                self.remove_file()?;
                debug!("rolled back claim {token} by {owner}");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn update_state(
        &self,
        owner: &OwnerId,
        token: &StageToken,
        state: StageState,
    ) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut record = self.load_held(owner, token)?;
        record.state = state;
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.save(&record)
    }

    pub fn set_metadata(
        &self,
        owner: &OwnerId,
        token: &StageToken,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut record = self.load_held(owner, token)?;
        record.metadata.insert(key.to_owned(), value);
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.save(&record)
    }

    pub fn get_metadata(
        &self,
        owner: &OwnerId,
        token: &StageToken,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let record = self.load_held(owner, token)?;
        Ok(record.metadata.get(key).cloned())
    }

    fn tombstone_path(&self, token: &StageToken) -> PathBuf {
        self.locator
            .tombstone_dir()
            .join(format!("{}.json", token.as_str()))
    }

    pub fn record_tombstone(&self, token: &StageToken, reason: &str) -> Result<(), StoreError> {
        let stone = Tombstone {
            token: token.clone(),
            reason: reason.to_owned(),
            destroyed_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_string_pretty(&stone)?;
        write_atomic(&self.tombstone_path(token), content.as_bytes())
    }

    pub fn tombstone(&self, token: &StageToken) -> Result<Option<Tombstone>, StoreError> {
        let path = self.tombstone_path(token);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_schema::SiteId;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn test_store() -> (tempfile::TempDir, OwnershipStore) {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathLocator::new(SiteId::new("test"), dir.path().join("app"))
            .with_state_dir(dir.path().join("state"))
            .with_staging_root(dir.path().join("stages"));
        locator.initialize().unwrap();
        (dir, OwnershipStore::new(locator))
    }

    fn meta(key: &str, value: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert(key.to_owned(), serde_json::json!(value));
        m
    }

    #[test]
    fn claim_when_free_succeeds() {
        let (_dir, store) = test_store();
        let owner = OwnerId::new("alice");
        let token = store.try_claim(&owner, Metadata::new()).unwrap();

        let record = store.current_owner().unwrap().unwrap();
        assert_eq!(record.owner_id, owner);
        assert_eq!(record.token, token);
        assert!(!record.finalized);
        assert_eq!(record.state, StageState::Created);
        assert!(store.is_owned_by(&owner).unwrap());
    }

    #[test]
    fn second_claim_fails_for_any_owner() {
        let (_dir, store) = test_store();
        store.try_claim(&OwnerId::new("alice"), Metadata::new()).unwrap();

        for other in ["alice", "bob"] {
            let err = store
                .try_claim(&OwnerId::new(other), Metadata::new())
                .unwrap_err();
            assert!(matches!(err, StoreError::AlreadyOwned { .. }));
        }
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let (dir, _store) = test_store();
        let state_dir = dir.path().join("state");
        let app_dir = dir.path().join("app");
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();

        for i in 0..8 {
            let b = Arc::clone(&barrier);
            let state = state_dir.clone();
            let app = app_dir.clone();
            handles.push(thread::spawn(move || {
                let locator = PathLocator::new(SiteId::new("test"), app).with_state_dir(state);
                let store = OwnershipStore::new(locator);
                b.wait();
                store.try_claim(&OwnerId::new(format!("owner-{i}")), Metadata::new())
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one concurrent claim must win");
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, StoreError::AlreadyOwned { .. })));
    }

    #[test]
    fn initial_metadata_visible_before_finalize() {
        let (_dir, store) = test_store();
        let owner = OwnerId::new("alice");
        let token = store.try_claim(&owner, meta("target", "1.1.0")).unwrap();
        assert_eq!(
            store.get_metadata(&owner, &token, "target").unwrap(),
            Some(serde_json::json!("1.1.0"))
        );
    }

    #[test]
    fn finalize_replaces_metadata_and_excludes() {
        let (_dir, store) = test_store();
        let owner = OwnerId::new("alice");
        let token = store.try_claim(&owner, meta("a", "1")).unwrap();
        store
            .finalize(&owner, &token, meta("b", "2"), vec!["web/files".to_owned()])
            .unwrap();

        let record = store.current_owner().unwrap().unwrap();
        assert!(record.finalized);
        assert_eq!(record.excluded_paths, vec!["web/files".to_owned()]);
        assert!(record.metadata.get("a").is_none());
        assert_eq!(record.metadata.get("b"), Some(&serde_json::json!("2")));
    }

    #[test]
    fn metadata_requires_owner_and_token() {
        let (_dir, store) = test_store();
        let owner = OwnerId::new("alice");
        let token = store.try_claim(&owner, Metadata::new()).unwrap();

        let err = store
            .set_metadata(&OwnerId::new("mallory"), &token, "k", serde_json::json!(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotOwner { .. }));

        let wrong_token = StageToken::new("ffffffffffffffffffffffffffffffff");
        assert!(store.get_metadata(&owner, &wrong_token, "k").is_err());

        store
            .set_metadata(&owner, &token, "k", serde_json::json!({"x": 1}))
            .unwrap();
        assert_eq!(
            store.get_metadata(&owner, &token, "k").unwrap(),
            Some(serde_json::json!({"x": 1}))
        );
    }

    #[test]
    fn release_clears_and_returns_previous() {
        let (_dir, store) = test_store();
        let owner = OwnerId::new("alice");
        let token = store.try_claim(&owner, Metadata::new()).unwrap();

        let previous = store.release().unwrap().unwrap();
        assert_eq!(previous.token, token);
        assert!(store.current_owner().unwrap().is_none());
        assert!(store.release().unwrap().is_none(), "release is idempotent");
        store.try_claim(&OwnerId::new("bob"), Metadata::new()).unwrap();
    }

    #[test]
    fn release_claim_ignores_foreign_records() {
        let (_dir, store) = test_store();
        let owner = OwnerId::new("alice");
        let token = store.try_claim(&owner, Metadata::new()).unwrap();

        assert!(!store.release_claim(&OwnerId::new("bob"), &token).unwrap());
        assert!(store.current_owner().unwrap().is_some());
        assert!(store.release_claim(&owner, &token).unwrap());
        assert!(store.current_owner().unwrap().is_none());
    }

    #[test]
    fn update_state_persists() {
        let (_dir, store) = test_store();
        let owner = OwnerId::new("alice");
        let token = store.try_claim(&owner, Metadata::new()).unwrap();
        store
            .update_state(&owner, &token, StageState::Required)
            .unwrap();
        assert_eq!(
            store.current_owner().unwrap().unwrap().state,
            StageState::Required
        );
    }

    #[test]
    fn tampered_record_fails_integrity() {
        let (dir, store) = test_store();
        let owner = OwnerId::new("alice");
        store.try_claim(&owner, Metadata::new()).unwrap();

        let path = dir.path().join("state").join("ownership.json");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("alice", "mallory")).unwrap();

        assert!(matches!(
            store.current_owner(),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn tombstones_roundtrip() {
        let (_dir, store) = test_store();
        let token = StageToken::new("0123456789abcdef0123456789abcdef");
        assert!(store.tombstone(&token).unwrap().is_none());
        store.record_tombstone(&token, "destroyed by admin").unwrap();
        let stone = store.tombstone(&token).unwrap().unwrap();
        assert_eq!(stone.reason, "destroyed by admin");
    }
}
