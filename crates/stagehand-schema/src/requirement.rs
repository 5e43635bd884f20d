use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A package name with an optional version constraint, written
/// `vendor/package` or `vendor/package:constraint`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageRequirement {
    name: String,
    constraint: Option<String>,
}

fn valid_name_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'))
}

impl PackageRequirement {
    pub fn new(name: &str, constraint: Option<&str>) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidRequirement {
            input: match constraint {
                Some(c) => format!("{name}:{c}"),
                None => name.to_owned(),
            },
            reason: reason.to_owned(),
        };

        let Some((vendor, package)) = name.split_once('/') else {
            return Err(invalid("package name must have the form vendor/package"));
        };
        if !valid_name_part(vendor) || !valid_name_part(package) {
            return Err(invalid(
                "package name must match [a-z0-9_.-]+/[a-z0-9_.-]+",
            ));
        }
        if let Some(c) = constraint {
            if c.trim().is_empty() {
                return Err(invalid("version constraint must not be empty"));
            }
        }

        Ok(Self {
            name: name.to_owned(),
            constraint: constraint.map(|c| c.trim().to_owned()),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }
}

impl FromStr for PackageRequirement {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((name, constraint)) => Self::new(name, Some(constraint)),
            None => Self::new(s, None),
        }
    }
}

impl TryFrom<String> for PackageRequirement {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PackageRequirement> for String {
    fn from(req: PackageRequirement) -> Self {
        req.to_string()
    }
}

impl fmt::Display for PackageRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(c) => write!(f, "{}:{c}", self.name),
            None => f.write_str(&self.name),
        }
    }
}
