//! Excluded-path collection: pluggable sources contribute paths that the
//! begin and commit steps must neither copy nor delete.

use crate::events::{EventKind, StageEvent};
use crate::hooks::{HookError, StageSubscriber};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// A contributed path, in one of the two supported conventions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExcludedPath {
    /// Relative to the project root.
    Project(PathBuf),
    /// Relative to the web root; rebased onto the project root on insert.
    Web(PathBuf),
}

impl ExcludedPath {
    pub fn project(path: impl Into<PathBuf>) -> Self {
        ExcludedPath::Project(path.into())
    }

    pub fn web(path: impl Into<PathBuf>) -> Self {
        ExcludedPath::Web(path.into())
    }
}

/// Strip `/` and `.` prefixes. Paths escaping the root (`..`) are rejected.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Deduplicated, ordered set of project-relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedPathSet {
    paths: BTreeSet<PathBuf>,
}

impl ExcludedPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a set persisted as strings (already project-relative).
    pub fn from_strings<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for p in paths {
            set.insert(ExcludedPath::project(p.as_ref()), Path::new(""));
        }
        set
    }

    pub fn insert(&mut self, path: ExcludedPath, web_root: &Path) -> bool {
        let raw = match path {
            ExcludedPath::Project(p) => p,
            ExcludedPath::Web(p) => match normalize(&p) {
                Some(rel) => web_root.join(rel),
                None => p,
            },
        };
        match normalize(&raw) {
            Some(p) => self.paths.insert(p),
            None => {
                warn!("ignoring excluded path outside the project: {}", raw.display());
                false
            }
        }
    }

    pub fn merge(&mut self, other: &ExcludedPathSet) {
        self.paths.extend(other.paths.iter().cloned());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.paths.iter().cloned().collect()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

/// A source of excluded paths.
pub trait PathExcluder: Send + Sync {
    fn name(&self) -> &str;

    fn contribute(&self, event: &StageEvent) -> Vec<ExcludedPath>;
}

/// Paths listed in `[exclusions]`.
pub struct ConfiguredPathsExcluder {
    project: Vec<String>,
    web: Vec<String>,
}

impl ConfiguredPathsExcluder {
    pub fn new(project: Vec<String>, web: Vec<String>) -> Self {
        Self { project, web }
    }
}

impl PathExcluder for ConfiguredPathsExcluder {
    fn name(&self) -> &'static str {
        "configured-paths"
    }

    fn contribute(&self, _event: &StageEvent) -> Vec<ExcludedPath> {
        self.project
            .iter()
            .map(ExcludedPath::project)
            .chain(self.web.iter().map(ExcludedPath::web))
            .collect()
    }
}

/// The state directory, when it lives inside the project. Copying it would
/// clone the ownership record and failure marker into the stage.
pub struct StateDirExcluder;

impl PathExcluder for StateDirExcluder {
    fn name(&self) -> &'static str {
        "state-dir"
    }

    fn contribute(&self, event: &StageEvent) -> Vec<ExcludedPath> {
        let locator = event.locator();
        locator
            .relative_to_project(locator.state_dir())
            .map(ExcludedPath::Project)
            .into_iter()
            .collect()
    }
}

/// The staging root, when misconfigured inside the project.
pub struct StagingRootExcluder;

impl PathExcluder for StagingRootExcluder {
    fn name(&self) -> &'static str {
        "staging-root"
    }

    fn contribute(&self, event: &StageEvent) -> Vec<ExcludedPath> {
        let locator = event.locator();
        locator
            .relative_to_project(locator.staging_root())
            .map(ExcludedPath::Project)
            .into_iter()
            .collect()
    }
}

/// Every directory named `name` below `root`, without descending into matches
/// or following symlinks.
fn find_named_dirs(root: &Path, name: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(rel) = pending.pop() {
        let Ok(listing) = std::fs::read_dir(root.join(&rel)) else {
            continue;
        };
        for entry in listing.flatten() {
            let Ok(ft) = entry.file_type() else {
                continue;
            };
            if !ft.is_dir() {
                continue;
            }
            let child = rel.join(entry.file_name());
            if entry.file_name() == name {
                found.push(child);
            } else {
                pending.push(child);
            }
        }
    }
    found.sort();
    found
}

/// Version-control metadata.
pub struct GitExcluder;

impl PathExcluder for GitExcluder {
    fn name(&self) -> &'static str {
        "git"
    }

    fn contribute(&self, event: &StageEvent) -> Vec<ExcludedPath> {
        find_named_dirs(event.locator().project_root(), ".git")
            .into_iter()
            .map(ExcludedPath::Project)
            .collect()
    }
}

/// JavaScript dependencies, which the PHP dependency manager never touches.
pub struct NodeModulesExcluder;

impl PathExcluder for NodeModulesExcluder {
    fn name(&self) -> &'static str {
        "node-modules"
    }

    fn contribute(&self, event: &StageEvent) -> Vec<ExcludedPath> {
        find_named_dirs(event.locator().project_root(), "node_modules")
            .into_iter()
            .map(ExcludedPath::Project)
            .collect()
    }
}

/// Merges every source's contribution into the event on PreCreate and
/// PreApply.
pub struct ExcludedPathCollector {
    sources: Vec<Box<dyn PathExcluder>>,
    priority: i32,
}

impl Default for ExcludedPathCollector {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            priority: -100,
        }
    }
}

impl ExcludedPathCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector with every built-in source.
    pub fn with_builtin_sources(project: Vec<String>, web: Vec<String>) -> Self {
        let mut c = Self::new();
        c.add_source(Box::new(ConfiguredPathsExcluder::new(project, web)));
        c.add_source(Box::new(StateDirExcluder));
        c.add_source(Box::new(StagingRootExcluder));
        c.add_source(Box::new(GitExcluder));
        c.add_source(Box::new(NodeModulesExcluder));
        c
    }

    pub fn add_source(&mut self, source: Box<dyn PathExcluder>) {
        self.sources.push(source);
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl StageSubscriber for ExcludedPathCollector {
    fn name(&self) -> &'static str {
        "excluded-path-collector"
    }

    fn subscriptions(&self) -> Vec<(EventKind, i32)> {
        vec![
            (EventKind::PreCreate, self.priority),
            (EventKind::PreApply, self.priority),
        ]
    }

    fn handle(&self, event: &mut StageEvent) -> Result<(), HookError> {
        for source in &self.sources {
            let contributed = source.contribute(event);
            debug!("{} contributed {} path(s)", source.name(), contributed.len());
            for path in contributed {
                event.exclude_path(path);
            }
        }
        Ok(())
    }
}
