//! Failure categories shared by the engine, scheduler and health tracker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Classification attached to every failure that crosses a component boundary.
///
/// `Unknown` is the explicit fallback: persisted values this build does not
/// recognise deserialize to it, and the backoff policy escalates it rather
/// than retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Network timeout, rate limit, step timeout
    Transient,
    /// Bad credentials, malformed schedule, missing binary
    Configuration,
    /// Unrecoverable state corruption
    Fatal,
    /// A task hit its iteration ceiling without completing
    LimitExceeded,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::Transient => "transient",
            FailureCategory::Configuration => "configuration",
            FailureCategory::Fatal => "fatal",
            FailureCategory::LimitExceeded => "limit_exceeded",
            FailureCategory::Unknown => "unknown",
        }
    }

    /// Whether a failure of this category is worth retrying at all.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureCategory::Transient)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "transient" => Ok(FailureCategory::Transient),
            "configuration" | "config" => Ok(FailureCategory::Configuration),
            "fatal" => Ok(FailureCategory::Fatal),
            "limit_exceeded" => Ok(FailureCategory::LimitExceeded),
            "unknown" => Ok(FailureCategory::Unknown),
            other => Err(format!("unknown failure category '{other}'")),
        }
    }
}

/// Error returned by external collaborators (reasoning step, action dispatch).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{category} failure: {message}")]
pub struct CollaboratorError {
    pub category: FailureCategory,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Transient, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Configuration, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Fatal, message)
    }
}
