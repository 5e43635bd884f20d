use crate::StoreError;
use stagehand_schema::{SiteId, StageToken, StagehandConfig};
use std::fs;
use std::path::{Path, PathBuf};

const OWNERSHIP_FILE: &str = "ownership.json";
const OWNERSHIP_LOCK: &str = "ownership.lock";
const TOMBSTONE_DIR: &str = "tombstones";
const FAILURE_MARKER_FILE: &str = "failure-marker.json";

/// Resolves every directory the stage life cycle touches.
///
/// The project root is the active (live) code base. The web root and vendor
/// directory are kept relative to it. The staging root holds one
/// subdirectory per stage token, and the state directory holds the ownership
/// record and failure marker so that neither is lost when a stage or the
/// active directory is rewritten.
#[derive(Debug, Clone)]
pub struct PathLocator {
    site_id: SiteId,
    project_root: PathBuf,
    web_root: PathBuf,
    vendor_dir: PathBuf,
    staging_root: PathBuf,
    state_dir: PathBuf,
}

/// `<temp>/.stagehand-<digest of site id>`, so different sites (and
/// concurrent test runs with distinct ids) never share a staging root.
fn default_staging_root(site_id: &SiteId) -> PathBuf {
    std::env::temp_dir().join(format!(".stagehand-{}", site_id.digest()))
}

impl PathLocator {
    pub fn new(site_id: SiteId, project_root: impl Into<PathBuf>) -> Self {
        let project_root: PathBuf = project_root.into();
        let staging_root = default_staging_root(&site_id);
        let state_dir = project_root.join(".stagehand");
        Self {
            site_id,
            project_root,
            web_root: PathBuf::new(),
            vendor_dir: PathBuf::from("vendor"),
            staging_root,
            state_dir,
        }
    }

    pub fn from_config(config: &StagehandConfig) -> Result<Self, StoreError> {
        let root = &config.paths.project_root;
        if !root.is_dir() {
            return Err(StoreError::MissingProjectRoot(root.clone()));
        }
        let mut locator = Self::new(config.site_id(), root.clone())
            .with_web_root(&config.paths.web_root)
            .with_vendor_dir(&config.paths.vendor_dir);
        if let Some(ref staging) = config.paths.staging_root {
            locator = locator.with_staging_root(staging.clone());
        }
        if let Some(ref state) = config.paths.state_dir {
            locator = locator.with_state_dir(state.clone());
        }
        Ok(locator)
    }

    #[must_use]
    pub fn with_web_root(mut self, web_root: impl AsRef<Path>) -> Self {
        self.web_root = web_root.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn with_vendor_dir(mut self, vendor_dir: impl AsRef<Path>) -> Self {
        self.vendor_dir = vendor_dir.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn with_staging_root(mut self, staging_root: impl Into<PathBuf>) -> Self {
        self.staging_root = staging_root.into();
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    #[inline]
    pub fn site_id(&self) -> &SiteId {
        &self.site_id
    }

    #[inline]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Web root relative to the project root. Empty means "same as root".
    #[inline]
    pub fn web_root(&self) -> &Path {
        &self.web_root
    }

    /// Absolute web root.
    #[inline]
    pub fn web_root_path(&self) -> PathBuf {
        self.project_root.join(&self.web_root)
    }

    #[inline]
    pub fn vendor_directory(&self) -> PathBuf {
        self.project_root.join(&self.vendor_dir)
    }

    #[inline]
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    #[inline]
    pub fn stage_dir(&self, token: &StageToken) -> PathBuf {
        self.staging_root.join(token.as_str())
    }

    #[inline]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[inline]
    pub fn ownership_file(&self) -> PathBuf {
        self.state_dir.join(OWNERSHIP_FILE)
    }

    #[inline]
    pub fn ownership_lock(&self) -> PathBuf {
        self.state_dir.join(OWNERSHIP_LOCK)
    }

    #[inline]
    pub fn tombstone_dir(&self) -> PathBuf {
        self.state_dir.join(TOMBSTONE_DIR)
    }

    #[inline]
    pub fn failure_marker_file(&self) -> PathBuf {
        self.state_dir.join(FAILURE_MARKER_FILE)
    }

    /// Express `path` relative to the project root, if it lies inside it.
    pub fn relative_to_project(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.project_root)
            .ok()
            .map(Path::to_path_buf)
    }

    /// Project-relative paths no copy may touch: the state directory and the
    /// staging root, whichever lie inside the project root.
    pub fn reserved_paths(&self) -> Vec<PathBuf> {
        [self.state_dir.as_path(), self.staging_root.as_path()]
            .into_iter()
            .filter_map(|p| self.relative_to_project(p))
            .filter(|p| !p.as_os_str().is_empty())
            .collect()
    }

    /// Directories in the staging root whose names are stage tokens.
    /// Anything else there is not ours.
    pub fn stage_dirs(&self) -> Vec<(StageToken, PathBuf)> {
        let Ok(entries) = fs::read_dir(&self.staging_root) else {
            return Vec::new();
        };
        let mut found: Vec<_> = entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                let token = StageToken::parse(&name)
                    .ok()
                    .filter(|t| t.as_str() == name)?;
                Some((token, e.path()))
            })
            .collect();
        found.sort();
        found
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.state_dir)?;
        fs::create_dir_all(self.tombstone_dir())?;
        fs::create_dir_all(&self.staging_root)?;
        Ok(())
    }
}
