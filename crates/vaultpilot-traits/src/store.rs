//! Versioned record store boundary.
//!
//! Every component reads and writes its records through this trait. Updates
//! are optimistic: a `put` names the version it read and fails with
//! `StoreError::Conflict` if the record moved in between.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::StoreError;

/// Longest accepted record id.
pub const MAX_ID_LEN: usize = 128;

/// The record families kept in the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Task,
    Schedule,
    Health,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Task, RecordKind::Schedule, RecordKind::Health];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Task => "task",
            RecordKind::Schedule => "schedule",
            RecordKind::Health => "health",
        }
    }

    /// Folder / table name used by the storage backends.
    pub fn collection(self) -> &'static str {
        match self {
            RecordKind::Task => "tasks",
            RecordKind::Schedule => "schedules",
            RecordKind::Health => "health",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version a writer expects to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The record must not exist yet.
    Absent,
    /// The record must currently be at this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Check a stored version (None = missing) against the expectation.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(expected), Some(actual)) => expected == actual,
            _ => false,
        }
    }

    /// Version the record will carry after a successful write.
    pub fn next(self) -> u64 {
        match self {
            ExpectedVersion::Absent => 1,
            ExpectedVersion::Exact(v) => v + 1,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Absent => f.write_str("absent"),
            ExpectedVersion::Exact(v) => write!(f, "v{v}"),
        }
    }
}

/// A record as the store sees it: structured fields plus a human-readable body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub version: u64,
    pub fields: Value,
    pub body: String,
}

/// Durable, versioned storage of task, schedule and health records.
///
/// Implementations must make `put` an atomic compare-and-swap per record.
pub trait RecordStore: Send + Sync {
    fn get(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Write `fields`/`body` if the stored version matches `expected`.
    /// Returns the new version.
    fn put(
        &self,
        kind: RecordKind,
        id: &str,
        fields: &Value,
        body: &str,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError>;

    /// All records of a kind, ordered by id.
    fn list(&self, kind: RecordKind) -> Result<Vec<(String, StoredRecord)>, StoreError>;

    /// Remove a record, returns true if it existed.
    fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, StoreError>;
}

/// Reject ids that cannot be used as a file name or table key.
pub fn validate_record_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_matching() {
        assert!(ExpectedVersion::Absent.matches(None));
        assert!(!ExpectedVersion::Absent.matches(Some(1)));
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(3).matches(None));
        assert_eq!(ExpectedVersion::Absent.next(), 1);
        assert_eq!(ExpectedVersion::Exact(7).next(), 8);
    }

    #[test]
    fn record_ids_are_filename_safe() {
        assert!(validate_record_id("daily-briefing_2.v1").is_ok());
        assert!(validate_record_id("").is_err());
        assert!(validate_record_id(".hidden").is_err());
        assert!(validate_record_id("../escape").is_err());
        assert!(validate_record_id("with space").is_err());
        assert!(validate_record_id(&"x".repeat(MAX_ID_LEN + 1)).is_err());
    }
}
