use crate::RuntimeError;
use stagehand_schema::RuntimeSection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The dependency-manager collaborator. The engine never touches files
/// directly; every copy between the active directory and a stage goes
/// through `begin` or `commit`.
pub trait StageBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Copy the active directory `src` into a fresh stage directory `dest`.
    fn begin(
        &self,
        src: &Path,
        dest: &Path,
        excluded: &[PathBuf],
        timeout: Duration,
    ) -> Result<(), RuntimeError>;

    /// Run one dependency-manager command (e.g. `require --no-update a:1.0`)
    /// inside the stage.
    fn stage(
        &self,
        args: &[String],
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError>;

    /// Sync the stage `src` back into the active directory `dest`. The only
    /// call permitted to write into the active directory.
    fn commit(
        &self,
        src: &Path,
        dest: &Path,
        excluded: &[PathBuf],
        timeout: Duration,
    ) -> Result<(), RuntimeError>;

    /// Remove a stage directory. Missing directories are not an error.
    fn discard(&self, stage_dir: &Path) -> Result<(), RuntimeError> {
        if stage_dir.exists() {
            std::fs::remove_dir_all(stage_dir)?;
        }
        Ok(())
    }
}

pub fn select_backend(config: &RuntimeSection) -> Result<Box<dyn StageBackend>, RuntimeError> {
    match config.backend.as_str() {
        "composer" => Ok(Box::new(crate::composer::ComposerBackend::from_config(
            config,
        ))),
        "mock" => Ok(Box::new(crate::mock::MockBackend::from_env())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
