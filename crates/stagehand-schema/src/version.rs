//! Version normalization, kept outside the engine as a swappable collaborator.
//!
//! Some projects publish versions in a legacy `<core>.x-<major>.<minor>` form
//! (`8.x-2.1`). Dependency managers want semantic versions (`2.1.0`). Callers
//! that build requirements pick a [`VersionNormalizer`]; the stage engine
//! itself never interprets version strings.

use crate::SchemaError;

pub trait VersionNormalizer: Send + Sync {
    fn normalize(&self, version: &str) -> Result<String, SchemaError>;
}

/// Passes versions through untouched, apart from trimming.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNormalizer;

impl VersionNormalizer for IdentityNormalizer {
    fn normalize(&self, version: &str) -> Result<String, SchemaError> {
        let v = version.trim();
        if v.is_empty() {
            return Err(SchemaError::InvalidVersion(version.to_owned()));
        }
        Ok(v.to_owned())
    }
}

/// Converts `8.x-2.1` style versions to `2.1.0`. Versions without a legacy
/// core prefix are returned as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyVersionConverter;

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl VersionNormalizer for LegacyVersionConverter {
    fn normalize(&self, version: &str) -> Result<String, SchemaError> {
        let v = version.trim();
        let invalid = || SchemaError::InvalidVersion(version.to_owned());
        if v.is_empty() {
            return Err(invalid());
        }

        let rest = match v.split_once(".x-") {
            Some((core, rest)) if all_digits(core) => rest,
            _ => return Ok(v.to_owned()),
        };

        let (base, extra) = match rest.split_once('-') {
            Some((base, extra)) if !extra.is_empty() => (base, Some(extra)),
            Some(_) => return Err(invalid()),
            None => (rest, None),
        };
        let suffix = extra.map(|e| format!("-{e}")).unwrap_or_default();

        let Some((major, minor)) = base.split_once('.') else {
            return Err(invalid());
        };
        if !all_digits(major) {
            return Err(invalid());
        }
        if minor == "x" {
            return Ok(format!("{major}.x{suffix}"));
        }
        if !all_digits(minor) {
            return Err(invalid());
        }
        Ok(format!("{major}.{minor}.0{suffix}"))
    }
}
