//! Configuration, identifiers, and result types shared by every Stagehand crate.
//!
//! This crate defines the schema layer: TOML configuration parsing
//! (`StagehandConfig`), opaque identifiers (`StageToken`, `OwnerId`, `SiteId`),
//! structured validation results (`ValidationResult`) whose invariants are
//! checked at construction, package requirement parsing (`PackageRequirement`),
//! and the swappable version-normalization collaborator (`VersionNormalizer`).

pub mod config;
pub mod requirement;
pub mod types;
pub mod validation;
pub mod version;

pub use config::{
    parse_config_file, parse_config_str, ConfigError, ExclusionsSection, PathsSection,
    RuntimeSection, SiteSection, StagehandConfig, SyncerKind, ValidationSection,
};
pub use requirement::PackageRequirement;
pub use types::{OwnerId, SiteId, StageToken};
pub use validation::{has_errors, Severity, ValidationResult};
pub use version::{IdentityNormalizer, LegacyVersionConverter, VersionNormalizer};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("validation result must carry at least one message")]
    EmptyMessages,
    #[error("validation result with {0} messages requires a summary")]
    MissingSummary(usize),
    #[error("invalid package requirement '{input}': {reason}")]
    InvalidRequirement { input: String, reason: String },
    #[error("invalid stage token '{0}'")]
    InvalidToken(String),
    #[error("unrecognized version string '{0}'")]
    InvalidVersion(String),
}
