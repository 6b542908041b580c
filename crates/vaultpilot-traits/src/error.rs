//! Error types shared across vaultpilot.

use std::time::Duration;
use thiserror::Error;

use crate::category::FailureCategory;
use crate::store::{ExpectedVersion, RecordKind};

/// Errors raised by record store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} '{id}' changed concurrently (expected {expected}, found {actual:?})")]
    Conflict {
        kind: RecordKind,
        id: String,
        expected: ExpectedVersion,
        actual: Option<u64>,
    },

    #[error("invalid record id '{0}'")]
    InvalidId(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// The five classes every error falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input, surfaced immediately, never retried
    Validation,
    /// Optimistic-concurrency collision, retried locally
    Conflict,
    /// Network/timeout, retried per backoff
    Transient,
    /// Bad credentials or malformed definitions, escalated
    Configuration,
    /// Corruption or exhausted limits, terminal
    Fatal,
}

impl ErrorClass {
    /// Process exit code used by the CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Validation => 2,
            ErrorClass::Conflict => 3,
            ErrorClass::Transient => 4,
            ErrorClass::Configuration => 5,
            ErrorClass::Fatal => 6,
        }
    }
}

/// Errors returned by the core contract calls.
#[derive(Error, Debug)]
pub enum VaultpilotError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: RecordKind, id: String },

    #[error("task '{0}' already exists")]
    DuplicateTask(String),

    #[error("task '{0}' already has a step in flight")]
    TaskBusy(String),

    #[error("task '{task_id}' reached its iteration limit of {max_iterations}")]
    IterationLimitExceeded { task_id: String, max_iterations: u32 },

    #[error("step for task '{task_id}' timed out after {timeout:?}")]
    StepTimeout { task_id: String, timeout: Duration },

    #[error("{kind} '{id}' kept changing concurrently")]
    Conflict { kind: RecordKind, id: String },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl VaultpilotError {
    pub fn validation(message: impl Into<String>) -> Self {
        VaultpilotError::Validation(message.into())
    }

    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        VaultpilotError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            VaultpilotError::Validation(_)
            | VaultpilotError::NotFound { .. }
            | VaultpilotError::DuplicateTask(_) => ErrorClass::Validation,
            VaultpilotError::TaskBusy(_) | VaultpilotError::Conflict { .. } => ErrorClass::Conflict,
            VaultpilotError::Transient(_) | VaultpilotError::StepTimeout { .. } => {
                ErrorClass::Transient
            }
            VaultpilotError::Configuration(_) => ErrorClass::Configuration,
            VaultpilotError::IterationLimitExceeded { .. }
            | VaultpilotError::Fatal(_)
            | VaultpilotError::Storage(_) => ErrorClass::Fatal,
        }
    }

    /// Category used when this error is reported to the health tracker.
    pub fn category(&self) -> FailureCategory {
        match self {
            VaultpilotError::IterationLimitExceeded { .. } => FailureCategory::LimitExceeded,
            other => match other.class() {
                ErrorClass::Transient | ErrorClass::Conflict => FailureCategory::Transient,
                ErrorClass::Configuration | ErrorClass::Validation => {
                    FailureCategory::Configuration
                }
                ErrorClass::Fatal => FailureCategory::Fatal,
            },
        }
    }
}

impl From<StoreError> for VaultpilotError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { kind, id, .. } => VaultpilotError::Conflict { kind, id },
            StoreError::InvalidId(id) => {
                VaultpilotError::Validation(format!("invalid record id '{id}'"))
            }
            StoreError::Backend(err) => VaultpilotError::Storage(err),
        }
    }
}

/// Result alias for core contract calls.
pub type Result<T> = std::result::Result<T, VaultpilotError>;
