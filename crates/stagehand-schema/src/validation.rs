use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A structured error or warning produced by a check at a life-cycle transition.
///
/// Always holds at least one message. A result with more than one message
/// carries a summary. Both rules are enforced by every constructor and by
/// deserialization, so a `ValidationResult` in hand is always well formed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawValidationResult")]
pub struct ValidationResult {
    severity: Severity,
    messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

#[derive(Deserialize)]
struct RawValidationResult {
    severity: Severity,
    messages: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
}

impl TryFrom<RawValidationResult> for ValidationResult {
    type Error = SchemaError;

    fn try_from(raw: RawValidationResult) -> Result<Self, Self::Error> {
        Self::new(raw.severity, raw.messages, raw.summary)
    }
}

impl ValidationResult {
    pub fn new(
        severity: Severity,
        messages: Vec<String>,
        summary: Option<String>,
    ) -> Result<Self, SchemaError> {
        if messages.is_empty() {
            return Err(SchemaError::EmptyMessages);
        }
        if messages.len() > 1 && summary.is_none() {
            return Err(SchemaError::MissingSummary(messages.len()));
        }
        Ok(Self {
            severity,
            messages,
            summary,
        })
    }

    /// Single-message error. Never needs a summary.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            messages: vec![message.into()],
            summary: None,
        }
    }

    /// Single-message warning. Never needs a summary.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            messages: vec![message.into()],
            summary: None,
        }
    }

    pub fn errors(messages: Vec<String>, summary: impl Into<String>) -> Result<Self, SchemaError> {
        Self::new(Severity::Error, messages, Some(summary.into()))
    }

    pub fn warnings(
        messages: Vec<String>,
        summary: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        Self::new(Severity::Warning, messages, Some(summary.into()))
    }

    #[inline]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[inline]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    #[inline]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.summary, self.messages.as_slice()) {
            (Some(summary), _) => write!(f, "{}: {summary}", self.severity),
            (None, [only]) => write!(f, "{}: {only}", self.severity),
            (None, _) => write!(f, "{}: {}", self.severity, self.messages.join("; ")),
        }
    }
}

pub fn has_errors(results: &[ValidationResult]) -> bool {
    results.iter().any(ValidationResult::is_error)
}
