//! Vaultpilot Traits - shared contracts and the error taxonomy.
//!
//! This crate provides the interfaces every other vaultpilot crate agrees on:
//! - `FailureCategory` and the `VaultpilotError` taxonomy
//! - `RecordStore`, the versioned record store boundary
//! - `AuditSink`, the append-only transition log
//! - `Reasoner`, the external collaborator that performs one task step
//! - `ActionDispatcher`, the boundary schedules fire through

pub mod action;
pub mod audit;
pub mod category;
pub mod error;
pub mod reasoner;
pub mod store;

// ── Top-level re-exports ─────────────────────────────────────────────

pub use action::{ActionDispatcher, ActionReceipt, ActionRequest};
pub use audit::{AuditEvent, AuditQuery, AuditSink};
pub use category::{CollaboratorError, FailureCategory};
pub use error::{ErrorClass, Result, StoreError, VaultpilotError};
pub use reasoner::{Reasoner, StepOutcome, StepRequest};
pub use store::{
    ExpectedVersion, MAX_ID_LEN, RecordKind, RecordStore, StoredRecord, validate_record_id,
};
