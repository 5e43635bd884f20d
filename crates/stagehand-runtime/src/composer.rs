use crate::backend::StageBackend;
use crate::prereq::command_exists;
use crate::process::run_process;
use crate::sync::{rsync_tree, sync_tree, SyncMode};
use crate::RuntimeError;
use stagehand_schema::{RuntimeSection, SyncerKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Drives a real `composer` executable inside the stage and syncs trees
/// either natively or with `rsync`.
pub struct ComposerBackend {
    composer: String,
    syncer: SyncerKind,
}

impl Default for ComposerBackend {
    fn default() -> Self {
        Self {
            composer: "composer".to_owned(),
            syncer: SyncerKind::Native,
        }
    }
}

impl ComposerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RuntimeSection) -> Self {
        Self {
            composer: config.composer.clone(),
            syncer: config.syncer,
        }
    }

    #[must_use]
    pub fn with_executable(mut self, composer: impl Into<String>) -> Self {
        self.composer = composer.into();
        self
    }

    pub fn executable(&self) -> &str {
        &self.composer
    }

    fn sync(
        &self,
        src: &Path,
        dest: &Path,
        excluded: &[PathBuf],
        mode: SyncMode,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        match self.syncer {
            SyncerKind::Native => sync_tree(src, dest, excluded, mode, timeout).map(|_| ()),
            SyncerKind::Rsync => rsync_tree("rsync", src, dest, excluded, mode, timeout),
        }
    }
}

impl StageBackend for ComposerBackend {
    fn name(&self) -> &'static str {
        "composer"
    }

    fn available(&self) -> bool {
        let composer = command_exists(&self.composer);
        match self.syncer {
            SyncerKind::Native => composer,
            SyncerKind::Rsync => composer && command_exists("rsync"),
        }
    }

    fn begin(
        &self,
        src: &Path,
        dest: &Path,
        excluded: &[PathBuf],
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        info!("copying {} into stage {}", src.display(), dest.display());
        self.sync(src, dest, excluded, SyncMode::Copy, timeout)
    }

    fn stage(
        &self,
        args: &[String],
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let mut full = args.to_vec();
        full.push("--no-interaction".to_owned());
        let output = run_process(
            &self.composer,
            &full,
            working_dir,
            timeout,
            &[("COMPOSER_NO_INTERACTION", "1")],
        )?;
        debug!("composer output:\n{}{}", output.stdout, output.stderr);
        Ok(())
    }

    fn commit(
        &self,
        src: &Path,
        dest: &Path,
        excluded: &[PathBuf],
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        info!("syncing stage {} into {}", src.display(), dest.display());
        self.sync(src, dest, excluded, SyncMode::Mirror, timeout)
    }
}
