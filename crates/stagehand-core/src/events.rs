use crate::excluder::{ExcludedPath, ExcludedPathSet};
use serde::{Deserialize, Serialize};
use stagehand_schema::{OwnerId, PackageRequirement, StageToken, ValidationResult};
use stagehand_store::{Metadata, PathLocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    PreCreate,
    PostCreate,
    PreRequire,
    PostRequire,
    PreApply,
    PostApply,
    PreDestroy,
    PostDestroy,
    /// Out-of-band readiness check. Collects results, never blocks anything.
    StatusCheck,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::PreCreate,
        EventKind::PostCreate,
        EventKind::PreRequire,
        EventKind::PostRequire,
        EventKind::PreApply,
        EventKind::PostApply,
        EventKind::PreDestroy,
        EventKind::PostDestroy,
        EventKind::StatusCheck,
    ];

    /// Pre-* events may veto their transition.
    pub fn can_block(self) -> bool {
        matches!(
            self,
            EventKind::PreCreate
                | EventKind::PreRequire
                | EventKind::PreApply
                | EventKind::PreDestroy
        )
    }

    /// Events that gather excluded paths for a copy step.
    pub fn collects_exclusions(self) -> bool {
        matches!(self, EventKind::PreCreate | EventKind::PreApply)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::PreCreate => "pre-create",
            EventKind::PostCreate => "post-create",
            EventKind::PreRequire => "pre-require",
            EventKind::PostRequire => "post-require",
            EventKind::PreApply => "pre-apply",
            EventKind::PostApply => "post-apply",
            EventKind::PreDestroy => "pre-destroy",
            EventKind::PostDestroy => "post-destroy",
            EventKind::StatusCheck => "status-check",
        };
        f.write_str(s)
    }
}

/// The record handed by exclusive reference to each handler in turn.
///
/// Handlers append results and excluded paths; later handlers see what
/// earlier ones added. Metadata edits made during a pre-* event are
/// persisted by the engine once the event passes.
#[derive(Debug, Clone)]
pub struct StageEvent {
    kind: EventKind,
    locator: PathLocator,
    token: Option<StageToken>,
    owner: Option<OwnerId>,
    metadata: Metadata,
    requirements: Vec<PackageRequirement>,
    dev_requirements: Vec<PackageRequirement>,
    excluded: ExcludedPathSet,
    results: Vec<ValidationResult>,
}

impl StageEvent {
    pub fn new(kind: EventKind, locator: PathLocator) -> Self {
        Self {
            kind,
            locator,
            token: None,
            owner: None,
            metadata: Metadata::new(),
            requirements: Vec::new(),
            dev_requirements: Vec::new(),
            excluded: ExcludedPathSet::new(),
            results: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_stage(mut self, token: StageToken, owner: OwnerId) -> Self {
        self.token = Some(token);
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_requirements(
        mut self,
        requirements: Vec<PackageRequirement>,
        dev_requirements: Vec<PackageRequirement>,
    ) -> Self {
        self.requirements = requirements;
        self.dev_requirements = dev_requirements;
        self
    }

    #[must_use]
    pub fn with_excluded(mut self, excluded: ExcludedPathSet) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn locator(&self) -> &PathLocator {
        &self.locator
    }

    pub fn token(&self) -> Option<&StageToken> {
        self.token.as_ref()
    }

    pub fn owner(&self) -> Option<&OwnerId> {
        self.owner.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn requirements(&self) -> &[PackageRequirement] {
        &self.requirements
    }

    pub fn dev_requirements(&self) -> &[PackageRequirement] {
        &self.dev_requirements
    }

    pub fn add_result(&mut self, result: ValidationResult) {
        self.results.push(result);
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.results.push(ValidationResult::error(message));
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.results.push(ValidationResult::warning(message));
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn has_errors(&self) -> bool {
        stagehand_schema::has_errors(&self.results)
    }

    /// Add a path to the deny-list used by the next copy step.
    pub fn exclude_path(&mut self, path: ExcludedPath) {
        self.excluded.insert(path, self.locator.web_root());
    }

    pub fn excluded_paths(&self) -> &ExcludedPathSet {
        &self.excluded
    }

    pub(crate) fn into_parts(self) -> (Metadata, ExcludedPathSet, Vec<ValidationResult>) {
        (self.metadata, self.excluded, self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_schema::{Severity, SiteId};

    fn event(kind: EventKind) -> StageEvent {
        StageEvent::new(kind, PathLocator::new(SiteId::new("t"), "/srv/app").with_web_root("web"))
    }

    #[test]
    fn only_pre_events_block() {
        let blocking: Vec<_> = EventKind::ALL.iter().filter(|k| k.can_block()).collect();
        assert_eq!(blocking.len(), 4);
        assert!(!EventKind::StatusCheck.can_block());
        assert!(!EventKind::PostApply.can_block());
    }

    #[test]
    fn results_accumulate_in_order() {
        let mut e = event(EventKind::PreCreate);
        e.add_warning("first");
        assert!(!e.has_errors());
        e.add_error("second");
        assert!(e.has_errors());
        assert_eq!(e.results()[0].severity(), Severity::Warning);
        assert_eq!(e.results()[1].messages(), ["second".to_owned()]);
    }

    #[test]
    fn web_relative_exclusions_are_rebased() {
        let mut e = event(EventKind::PreApply);
        e.exclude_path(ExcludedPath::web("sites/default/files"));
        e.exclude_path(ExcludedPath::project("web/sites/default/files"));
        e.exclude_path(ExcludedPath::project("private"));
        let paths: Vec<_> = e.excluded_paths().iter().cloned().collect();
        assert_eq!(
            paths,
            vec![
                std::path::PathBuf::from("private"),
                std::path::PathBuf::from("web/sites/default/files"),
            ]
        );
    }

    #[test]
    fn metadata_is_mutable_through_event() {
        let mut e = event(EventKind::PreCreate);
        e.set_metadata("target", serde_json::json!("1.1.0"));
        assert_eq!(e.get_metadata("target"), Some(&serde_json::json!("1.1.0")));
    }

    #[test]
    fn event_kind_display_is_kebab() {
        assert_eq!(EventKind::PreCreate.to_string(), "pre-create");
        assert_eq!(
            serde_json::to_string(&EventKind::StatusCheck).unwrap(),
            "\"status-check\""
        );
    }
}
