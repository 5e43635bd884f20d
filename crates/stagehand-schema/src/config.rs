use crate::types::SiteId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("site.id must not be empty")]
    EmptySiteId,
    #[error("paths.project_root must not be empty")]
    MissingProjectRoot,
    #[error("paths.{field} must be a relative path inside the project root, got '{value}'")]
    InvalidRelativePath { field: &'static str, value: String },
    #[error("runtime.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StagehandConfig {
    pub config_version: u32,
    pub site: SiteSection,
    pub paths: PathsSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub exclusions: ExclusionsSection,
    #[serde(default)]
    pub validation: ValidationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SiteSection {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    pub project_root: PathBuf,
    /// Relative to the project root. Empty means the web root is the project root.
    #[serde(default)]
    pub web_root: String,
    #[serde(default = "default_vendor_dir")]
    pub vendor_dir: String,
    #[serde(default)]
    pub staging_root: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncerKind {
    #[default]
    Native,
    Rsync,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_composer")]
    pub composer: String,
    #[serde(default)]
    pub syncer: SyncerKind,
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,
    #[serde(default = "default_commit_timeout")]
    pub commit_timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            composer: default_composer(),
            syncer: SyncerKind::default(),
            process_timeout_secs: default_process_timeout(),
            commit_timeout_secs: default_commit_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExclusionsSection {
    /// Paths relative to the project root.
    #[serde(default)]
    pub project: Vec<String>,
    /// Paths relative to the web root.
    #[serde(default)]
    pub web: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ValidationSection {
    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            min_free_mb: default_min_free_mb(),
        }
    }
}

fn default_vendor_dir() -> String {
    "vendor".to_owned()
}

fn default_backend() -> String {
    "composer".to_owned()
}

fn default_composer() -> String {
    "composer".to_owned()
}

fn default_process_timeout() -> u64 {
    300
}

fn default_commit_timeout() -> u64 {
    600
}

fn default_min_free_mb() -> u64 {
    1024
}

fn is_inner_relative(value: &str) -> bool {
    Path::new(value)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl StagehandConfig {
    pub fn site_id(&self) -> SiteId {
        SiteId::new(self.site.id.trim())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }
        if self.site.id.trim().is_empty() {
            return Err(ConfigError::EmptySiteId);
        }
        if self.paths.project_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingProjectRoot);
        }
        if !is_inner_relative(&self.paths.web_root) {
            return Err(ConfigError::InvalidRelativePath {
                field: "web_root",
                value: self.paths.web_root.clone(),
            });
        }
        if self.paths.vendor_dir.is_empty() || !is_inner_relative(&self.paths.vendor_dir) {
            return Err(ConfigError::InvalidRelativePath {
                field: "vendor_dir",
                value: self.paths.vendor_dir.clone(),
            });
        }
        if self.runtime.process_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("process_timeout_secs"));
        }
        if self.runtime.commit_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("commit_timeout_secs"));
        }
        Ok(())
    }

    /// Resolve relative filesystem paths against `base` (normally the
    /// directory holding the config file).
    fn resolve_relative_to(&mut self, base: &Path) {
        let absolutize = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        absolutize(&mut self.paths.project_root);
        if let Some(ref mut staging) = self.paths.staging_root {
            absolutize(staging);
        }
        if let Some(ref mut state) = self.paths.state_dir {
            absolutize(state);
        }
    }
}

pub fn parse_config_str(input: &str) -> Result<StagehandConfig, ConfigError> {
    let config: StagehandConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<StagehandConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut config = parse_config_str(&content)?;
    let base = path.parent().unwrap_or(Path::new("."));
    config.resolve_relative_to(base);
    Ok(config)
}
