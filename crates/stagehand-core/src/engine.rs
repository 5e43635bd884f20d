use crate::concurrency::shutdown_requested;
use crate::events::{EventKind, StageEvent};
use crate::excluder::{ExcludedPath, ExcludedPathSet};
use crate::hooks::HookBus;
use crate::lifecycle::validate_transition;
use crate::validators::register_builtin;
use crate::{CoreError, StageValidationError};
use serde::Serialize;
use stagehand_runtime::{select_backend, StageBackend};
use stagehand_schema::{
    OwnerId, PackageRequirement, RuntimeSection, StageToken, StagehandConfig, ValidationResult,
};
use stagehand_store::{
    FailureMarker, MarkerRecord, Metadata, OwnershipRecord, OwnershipStore, PathLocator,
    StageState, StoreError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Limit for `begin` and each dependency-manager invocation.
    pub process_timeout: Duration,
    /// Limit for the commit into the active directory.
    pub commit_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&RuntimeSection::default())
    }
}

impl EngineOptions {
    pub fn from_config(runtime: &RuntimeSection) -> Self {
        Self {
            process_timeout: Duration::from_secs(runtime.process_timeout_secs),
            commit_timeout: Duration::from_secs(runtime.commit_timeout_secs),
        }
    }
}

/// Snapshot of the staging area for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub available: bool,
    pub token: Option<String>,
    pub owner_id: Option<String>,
    pub state: Option<StageState>,
    pub finalized: Option<bool>,
    pub created_at: Option<String>,
    pub stage_dir: Option<PathBuf>,
    pub failure_marker: Option<MarkerRecord>,
}

/// Orchestrates create, require, apply and destroy for one caller identity.
///
/// The owner id, not the process, is the identity: a later process with the
/// same owner id resumes a stage through [`StageEngine::claim`]. Every
/// operation other than `create` first verifies that this engine's owner and
/// token hold the ownership record.
pub struct StageEngine {
    locator: PathLocator,
    store: OwnershipStore,
    marker: FailureMarker,
    bus: HookBus,
    backend: Arc<dyn StageBackend>,
    owner: OwnerId,
    options: EngineOptions,
    token: Option<StageToken>,
}

impl StageEngine {
    pub fn new(
        locator: PathLocator,
        backend: Arc<dyn StageBackend>,
        bus: HookBus,
        owner: OwnerId,
        options: EngineOptions,
    ) -> Self {
        let store = OwnershipStore::new(locator.clone());
        let marker = FailureMarker::new(&locator);
        Self {
            locator,
            store,
            marker,
            bus,
            backend,
            owner,
            options,
            token: None,
        }
    }

    /// Engine with the configured backend and every built-in subscriber.
    pub fn from_config(config: &StagehandConfig, owner: OwnerId) -> Result<Self, CoreError> {
        config.validate()?;
        let locator = PathLocator::from_config(config)?;
        let backend: Arc<dyn StageBackend> = Arc::from(select_backend(&config.runtime)?);
        let mut bus = HookBus::new();
        register_builtin(&mut bus, config, Arc::clone(&backend));
        Ok(Self::new(
            locator,
            backend,
            bus,
            owner,
            EngineOptions::from_config(&config.runtime),
        ))
    }

    pub fn locator(&self) -> &PathLocator {
        &self.locator
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn token(&self) -> Option<&StageToken> {
        self.token.as_ref()
    }

    pub fn backend(&self) -> &dyn StageBackend {
        self.backend.as_ref()
    }

    pub fn failure_marker(&self) -> &FailureMarker {
        &self.marker
    }

    pub fn hook_bus_mut(&mut self) -> &mut HookBus {
        &mut self.bus
    }

    pub fn stage_dir(&self) -> Option<PathBuf> {
        self.token.as_ref().map(|t| self.locator.stage_dir(t))
    }

    /// Whether `create` could succeed as far as ownership is concerned.
    pub fn is_available(&self) -> Result<bool, CoreError> {
        Ok(self.store.current_owner()?.is_none())
    }

    fn check_marker(&self) -> Result<(), CoreError> {
        if let Some(record) = self.marker.read()? {
            return Err(CoreError::FailureMarkerPresent {
                message: record.message,
            });
        }
        Ok(())
    }

    fn event(&self, kind: EventKind, record: Option<&OwnershipRecord>) -> StageEvent {
        let event = StageEvent::new(kind, self.locator.clone());
        match record {
            Some(r) => event
                .with_stage(r.token.clone(), r.owner_id.clone())
                .with_metadata(r.metadata.clone()),
            None => event,
        }
    }

    /// Dispatch a pre-* event and turn error results into a validation error.
    ///
    /// Events that collect exclusions always exclude the locator's reserved
    /// paths, whatever subscribers are registered.
    fn dispatch_pre(&self, event: &mut StageEvent) -> Result<(), CoreError> {
        self.bus.dispatch(event)?;
        if event.kind().collects_exclusions() {
            for path in self.locator.reserved_paths() {
                event.exclude_path(ExcludedPath::Project(path));
            }
        }
        for r in event.results().iter().filter(|r| !r.is_error()) {
            warn!("{}: {r}", event.kind());
        }
        if event.kind().can_block() && event.has_errors() {
            return Err(StageValidationError::new(event.kind(), event.results().to_vec()).into());
        }
        Ok(())
    }

    /// Post-* events cannot block: failures and error results are logged.
    fn dispatch_post(&self, mut event: StageEvent) {
        let kind = event.kind();
        if let Err(e) = self.bus.dispatch(&mut event) {
            warn!("{kind} hook failed: {e}");
        }
        for r in event.results() {
            warn!("{kind}: {r}");
        }
    }

    /// Verify that this engine holds the current claim and return the record.
    fn ensure_owned(&self) -> Result<OwnershipRecord, CoreError> {
        let token = self.token.as_ref().ok_or_else(|| {
            CoreError::ownership("no stage has been created or claimed by this instance")
        })?;
        self.check_held(token)
    }

    fn check_held(&self, token: &StageToken) -> Result<OwnershipRecord, CoreError> {
        if let Some(stone) = self.store.tombstone(token)? {
            return Err(CoreError::ownership(format!(
                "stage {token} no longer exists: {}",
                stone.reason
            )));
        }
        let Some(record) = self.store.current_owner()? else {
            return Err(CoreError::ownership(format!("stage {token} does not exist")));
        };
        if !record.is_held_by(&self.owner, token) {
            return Err(CoreError::ownership(format!(
                "stage {token} is not owned by '{}'",
                self.owner
            )));
        }
        if !record.finalized {
            return Err(CoreError::ownership(format!(
                "creation of stage {token} has not completed"
            )));
        }
        Ok(record)
    }

    fn map_store(e: StoreError) -> CoreError {
        match e {
            StoreError::NotOwner { caller } => {
                CoreError::ownership(format!("stage is not owned by '{caller}'"))
            }
            StoreError::NoStage => CoreError::ownership("stage does not exist"),
            other => CoreError::Store(other),
        }
    }

    /// Persist metadata keys a pre-* handler added or changed.
    fn persist_metadata(
        &self,
        token: &StageToken,
        before: &Metadata,
        after: &Metadata,
    ) -> Result<(), CoreError> {
        for (key, value) in after {
            if before.get(key) != Some(value) {
                self.store
                    .set_metadata(&self.owner, token, key, value.clone())
                    .map_err(Self::map_store)?;
            }
        }
        Ok(())
    }

    /// Remove stage directories left behind by crashed processes. Only called
    /// while this engine holds the claim, so nothing else is live. Entries not
    /// named like a token are left alone.
    fn sweep_stale_stages(&self, keep: &StageToken) {
        for (token, path) in self.locator.stage_dirs() {
            if &token == keep {
                continue;
            }
            debug!("removing stale stage directory {}", path.display());
            if let Err(e) = self.backend.discard(&path) {
                warn!("failed to remove stale stage {}: {e}", path.display());
            }
        }
    }

    fn rollback_claim(&self, token: &StageToken) {
        match self.store.release_claim(&self.owner, token) {
            Ok(true) => debug!("speculative claim {token} rolled back"),
            Ok(false) => warn!("speculative claim {token} was replaced before rollback"),
            Err(e) => error!("failed to roll back speculative claim {token}: {e}"),
        }
    }

    /// Create the one staging area and claim it for this engine's owner.
    ///
    /// `metadata` is written into the speculative claim before PreCreate, so
    /// validators can read it; anything they add is kept when the claim is
    /// finalized.
    pub fn create(&mut self, metadata: Metadata) -> Result<StageToken, CoreError> {
        self.check_marker()?;
        self.locator.initialize()?;

        let token = self.store.try_claim(&self.owner, metadata).map_err(|e| match e {
            StoreError::AlreadyOwned { owner_id, token } => CoreError::StageBusy { owner_id, token },
            other => CoreError::Store(other),
        })?;
        info!("creating stage {token} for {}", self.owner);

        if let Err(e) = self.prepare_stage(&token) {
            self.rollback_claim(&token);
            return Err(e);
        }

        self.token = Some(token.clone());
        let record = self.store.current_owner()?;
        self.dispatch_post(self.event(EventKind::PostCreate, record.as_ref()));
        info!("stage {token} created");
        Ok(token)
    }

    /// PreCreate, copy into the stage, finalize. Any failure leaves the
    /// speculative claim for the caller to roll back.
    fn prepare_stage(&self, token: &StageToken) -> Result<(), CoreError> {
        let record = self.store.current_owner()?;
        let mut event = self.event(EventKind::PreCreate, record.as_ref());
        self.dispatch_pre(&mut event)?;
        let (metadata, excluded, _) = event.into_parts();

        self.sweep_stale_stages(token);
        let stage_dir = self.locator.stage_dir(token);
        if stage_dir.exists() {
            self.backend.discard(&stage_dir)?;
        }
        self.backend.begin(
            self.locator.project_root(),
            &stage_dir,
            &excluded.to_vec(),
            self.options.process_timeout,
        )?;

        self.store
            .finalize(&self.owner, token, metadata, excluded.to_strings())?;
        Ok(())
    }

    /// Resume a stage created earlier by the same owner.
    pub fn claim(&mut self, token: &StageToken) -> Result<(), CoreError> {
        self.check_held(token)?;
        self.token = Some(token.clone());
        debug!("claimed stage {token} for {}", self.owner);
        Ok(())
    }

    /// Apply requirement changes inside the stage.
    ///
    /// Runs up to three dependency-manager calls in fixed order:
    /// `require --no-update` for runtime packages, `require --dev --no-update`
    /// for dev packages, then `update --with-all-dependencies` naming every
    /// requested package. Empty batches are skipped.
    pub fn require(
        &mut self,
        requirements: &[PackageRequirement],
        dev_requirements: &[PackageRequirement],
    ) -> Result<(), CoreError> {
        let record = self.ensure_owned()?;
        validate_transition(record.state, StageState::Required)?;
        let token = record.token.clone();
        info!(
            "requiring {} package(s) and {} dev package(s) in stage {token}",
            requirements.len(),
            dev_requirements.len()
        );

        let mut event = self
            .event(EventKind::PreRequire, Some(&record))
            .with_requirements(requirements.to_vec(), dev_requirements.to_vec());
        self.dispatch_pre(&mut event)?;
        self.persist_metadata(&token, &record.metadata, event.metadata())?;

        let stage_dir = self.locator.stage_dir(&token);
        let timeout = self.options.process_timeout;
        let as_args = |reqs: &[PackageRequirement]| -> Vec<String> {
            reqs.iter().map(ToString::to_string).collect()
        };

        if !requirements.is_empty() {
            let mut args = vec!["require".to_owned(), "--no-update".to_owned()];
            args.extend(as_args(requirements));
            self.backend.stage(&args, &stage_dir, timeout)?;
        }
        if !dev_requirements.is_empty() {
            let mut args = vec![
                "require".to_owned(),
                "--dev".to_owned(),
                "--no-update".to_owned(),
            ];
            args.extend(as_args(dev_requirements));
            self.backend.stage(&args, &stage_dir, timeout)?;
        }
        if requirements.is_empty() && dev_requirements.is_empty() {
            debug!("no requirements given; skipping dependency manager");
        } else {
            let mut args = vec![
                "update".to_owned(),
                "--with-all-dependencies".to_owned(),
            ];
            args.extend(
                requirements
                    .iter()
                    .chain(dev_requirements)
                    .map(|r| r.name().to_owned()),
            );
            self.backend.stage(&args, &stage_dir, timeout)?;
        }

        self.store
            .update_state(&self.owner, &token, StageState::Required)
            .map_err(Self::map_store)?;

        let record = self.store.current_owner()?;
        let post = self
            .event(EventKind::PostRequire, record.as_ref())
            .with_requirements(requirements.to_vec(), dev_requirements.to_vec());
        self.dispatch_post(post);
        info!("stage {token} requirements applied");
        Ok(())
    }

    /// Sync the stage into the active directory.
    ///
    /// The failure marker is written before the commit and cleared only when
    /// the commit returns successfully. A failed commit leaves it in place.
    pub fn apply(&mut self) -> Result<(), CoreError> {
        let record = self.ensure_owned()?;
        validate_transition(record.state, StageState::Applied)?;
        if shutdown_requested() {
            return Err(CoreError::ShutdownRequested);
        }
        self.check_marker()?;
        let token = record.token.clone();
        info!("applying stage {token}");

        let mut event = self
            .event(EventKind::PreApply, Some(&record))
            .with_excluded(ExcludedPathSet::from_strings(&record.excluded_paths));
        self.dispatch_pre(&mut event)?;
        self.persist_metadata(&token, &record.metadata, event.metadata())?;
        let excluded = event.excluded_paths().to_vec();

        self.marker.write(&token, &self.owner, None)?;
        let committed = self.backend.commit(
            &self.locator.stage_dir(&token),
            self.locator.project_root(),
            &excluded,
            self.options.commit_timeout,
        );
        if let Err(e) = committed {
            error!(
                "commit of stage {token} failed; failure marker left at {}: {e}",
                self.marker.path().display()
            );
            return Err(e.into());
        }
        self.marker.clear()?;

        self.store
            .update_state(&self.owner, &token, StageState::Applied)
            .map_err(Self::map_store)?;
        let record = self.store.current_owner()?;
        self.dispatch_post(self.event(EventKind::PostApply, record.as_ref()));
        info!("stage {token} applied");
        Ok(())
    }

    /// Delete the stage and release ownership.
    ///
    /// Without `force`, the caller must hold the claim. With `force`, any
    /// stage is destroyed regardless of owner; the original owner then finds
    /// a tombstone instead of its stage. Destroying when no stage exists is a
    /// no-op.
    pub fn destroy(&mut self, force: bool) -> Result<(), CoreError> {
        let record = match self.store.current_owner() {
            Ok(r) => r,
            Err(StoreError::IntegrityFailure { path, .. }) if force => {
                warn!("force-destroying stage with corrupt ownership record {path}");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let Some(record) = record else {
            if force {
                self.store.release()?;
            }
            debug!("destroy: no stage exists");
            self.token = None;
            return Ok(());
        };

        let held = self
            .token
            .as_ref()
            .is_some_and(|t| record.is_held_by(&self.owner, t));
        if !force && !held {
            return Err(CoreError::ownership(format!(
                "stage {} is owned by '{}', not '{}'",
                record.token, record.owner_id, self.owner
            )));
        }
        let token = record.token.clone();
        info!("destroying stage {token}");

        let mut event = self.event(EventKind::PreDestroy, Some(&record));
        self.dispatch_pre(&mut event)?;

        if let Err(e) = self.backend.discard(&self.locator.stage_dir(&token)) {
            warn!("failed to delete stage directory for {token}: {e}");
        }
        self.store.release()?;

        if !held {
            warn!(
                "stage {token} owned by '{}' was force-destroyed by '{}'",
                record.owner_id, self.owner
            );
        }
        if record.owner_id != self.owner {
            let reason = format!("stage was destroyed by '{}' using force", self.owner);
            if let Err(e) = self.store.record_tombstone(&token, &reason) {
                warn!("failed to record tombstone for {token}: {e}");
            }
        }

        self.token = None;
        let post = StageEvent::new(EventKind::PostDestroy, self.locator.clone())
            .with_stage(token.clone(), record.owner_id.clone())
            .with_metadata(record.metadata);
        self.dispatch_post(post);
        info!("stage {token} destroyed");
        Ok(())
    }

    /// Dispatch the out-of-band status event and return its results
    /// uninterpreted. Works with or without a stage.
    pub fn status_check(&self) -> Result<Vec<ValidationResult>, CoreError> {
        let record = match self.store.current_owner() {
            Ok(r) => r,
            Err(e) => {
                warn!("status check: unreadable ownership record: {e}");
                None
            }
        };
        let mut event = self.event(EventKind::StatusCheck, record.as_ref());
        self.bus.dispatch(&mut event)?;
        let (_, _, results) = event.into_parts();
        Ok(results)
    }

    pub fn status(&self) -> Result<StageStatus, CoreError> {
        let record = self.store.current_owner()?;
        let failure_marker = self.marker.read()?;
        Ok(match record {
            Some(r) => StageStatus {
                available: false,
                stage_dir: Some(self.locator.stage_dir(&r.token)),
                token: Some(r.token.into_inner()),
                owner_id: Some(r.owner_id.into_inner()),
                state: Some(r.state),
                finalized: Some(r.finalized),
                created_at: Some(r.created_at),
                failure_marker,
            },
            None => StageStatus {
                available: true,
                token: None,
                owner_id: None,
                state: None,
                finalized: None,
                created_at: None,
                stage_dir: None,
                failure_marker,
            },
        })
    }

    pub fn state(&self) -> Result<Option<StageState>, CoreError> {
        Ok(self.ensure_owned().ok().map(|r| r.state))
    }

    pub fn set_metadata(&self, key: &str, value: serde_json::Value) -> Result<(), CoreError> {
        let record = self.ensure_owned()?;
        self.store
            .set_metadata(&self.owner, &record.token, key, value)
            .map_err(Self::map_store)
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError> {
        let record = self.ensure_owned()?;
        Ok(record.metadata.get(key).cloned())
    }
}
