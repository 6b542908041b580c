//! Vaultpilot Storage - backends for the record store and audit boundaries.
//!
//! Two interchangeable backends implement `RecordStore` and `AuditSink`:
//!
//! - `VaultStore` / `JsonlAuditLog`: a folder tree of markdown documents, one
//!   per record, each with a YAML frontmatter header, plus an append-only
//!   JSON-lines audit file.
//! - `RedbStore` / `RedbAuditLog`: the same data in an embedded redb
//!   database, with compare-and-swap checked inside one write transaction.
//!
//! # Layout
//!
//! - `tasks/`, `schedules/`, `health/` - one `<id>.md` per record
//! - `audit/events.jsonl` - audit events in arrival order

pub mod audit;
pub mod frontmatter;
pub mod paths;
pub mod redb_store;
pub mod vault;

pub use audit::{JsonlAuditLog, RedbAuditLog};
pub use redb_store::RedbStore;
pub use vault::VaultStore;
