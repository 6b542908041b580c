//! Typed record storage.
//!
//! Wraps the JSON-level `RecordStore` boundary with serde conversion for the
//! model types and provides the optimistic read-modify-write loop every
//! component uses to change a record.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use vaultpilot_traits::{
    ExpectedVersion, RecordKind, RecordStore, Result, StoredRecord, VaultpilotError,
};

/// A model type persisted as one vault document.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: RecordKind;

    fn id(&self) -> &str;

    /// Human-readable markdown body written below the metadata header.
    fn render_body(&self) -> String;
}

/// A record together with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// Result of a read-modify-write.
#[derive(Debug, Clone)]
pub struct Update<T> {
    /// Record as read before the change
    pub before: T,
    /// Record as stored afterwards (equal to `before` when nothing changed)
    pub after: Versioned<T>,
    pub changed: bool,
}

/// Typed access to the record store.
#[derive(Clone)]
pub struct TypedStore {
    inner: Arc<dyn RecordStore>,
}

impl TypedStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self { inner }
    }

    pub fn raw(&self) -> &Arc<dyn RecordStore> {
        &self.inner
    }

    fn decode<T: Record>(id: &str, stored: StoredRecord) -> Result<Versioned<T>> {
        let record = serde_json::from_value(stored.fields).map_err(|e| {
            VaultpilotError::Fatal(format!("{} '{}' is corrupt: {}", T::KIND, id, e))
        })?;
        Ok(Versioned {
            version: stored.version,
            record,
        })
    }

    fn encode<T: Record>(record: &T) -> Result<serde_json::Value> {
        serde_json::to_value(record).map_err(|e| {
            VaultpilotError::Fatal(format!("{} '{}' cannot be encoded: {}", T::KIND, record.id(), e))
        })
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<Option<Versioned<T>>> {
        match self.inner.get(T::KIND, id)? {
            Some(stored) => Ok(Some(Self::decode(id, stored)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but a missing record is a `NotFound` error.
    pub fn load<T: Record>(&self, id: &str) -> Result<Versioned<T>> {
        self.get(id)?
            .ok_or_else(|| VaultpilotError::not_found(T::KIND, id))
    }

    fn put<T: Record>(&self, record: &T, expected: ExpectedVersion) -> Result<u64> {
        let fields = Self::encode(record)?;
        Ok(self
            .inner
            .put(T::KIND, record.id(), &fields, &record.render_body(), expected)?)
    }

    /// Store a new record. Fails with `Conflict` if the id is taken.
    pub fn create<T: Record>(&self, record: &T) -> Result<u64> {
        self.put(record, ExpectedVersion::Absent)
    }

    /// Replace the record stored at `version`.
    pub fn replace<T: Record>(&self, record: &T, version: u64) -> Result<u64> {
        self.put(record, ExpectedVersion::Exact(version))
    }

    pub fn list<T: Record>(&self) -> Result<Vec<Versioned<T>>> {
        self.inner
            .list(T::KIND)?
            .into_iter()
            .map(|(id, stored)| Self::decode(&id, stored))
            .collect()
    }

    pub fn list_records<T: Record>(&self) -> Result<Vec<T>> {
        Ok(self.list::<T>()?.into_iter().map(|v| v.record).collect())
    }

    pub fn delete<T: Record>(&self, id: &str) -> Result<bool> {
        Ok(self.inner.delete(T::KIND, id)?)
    }

    /// Optimistic read-modify-write of one record.
    ///
    /// `change` sees the current record and returns the next one, or `None`
    /// to leave it as is. On a version conflict the record is re-read and
    /// `change` runs again, up to `retries` extra times.
    pub fn update_with<T, F>(&self, id: &str, retries: u32, mut change: F) -> Result<Update<T>>
    where
        T: Record,
        F: FnMut(&T) -> Result<Option<T>>,
    {
        let mut attempt = 0;
        loop {
            let current = self.load::<T>(id)?;
            let Some(next) = change(&current.record)? else {
                return Ok(Update {
                    before: current.record.clone(),
                    after: current,
                    changed: false,
                });
            };

            match self.replace(&next, current.version) {
                Ok(version) => {
                    return Ok(Update {
                        before: current.record,
                        after: Versioned {
                            version,
                            record: next,
                        },
                        changed: true,
                    });
                }
                Err(VaultpilotError::Conflict { .. }) if attempt < retries => {
                    attempt += 1;
                    debug!(kind = %T::KIND, id = %id, attempt, "Version conflict, re-reading");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskRecord, TaskStatus};
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vaultpilot_storage::VaultStore;
    use vaultpilot_traits::StoreError;

    fn store(dir: &tempfile::TempDir) -> TypedStore {
        TypedStore::new(Arc::new(VaultStore::open(dir.path()).unwrap()))
    }

    #[test]
    fn typed_round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let mut task = TaskRecord::new("t1", "objective", 4, TaskStatus::Running, Utc::now());
        task.output_summary = "multi\nline: summary".into();

        store.create(&task).unwrap();
        let loaded = store.load::<TaskRecord>("t1").unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.record, task);
    }

    #[test]
    fn update_with_retries_after_conflict() {
        /// Store that reports one conflict on the first replace.
        struct FlakyStore {
            inner: VaultStore,
            conflicts_left: AtomicU32,
        }

        impl RecordStore for FlakyStore {
            fn get(&self, kind: RecordKind, id: &str) -> std::result::Result<Option<StoredRecord>, StoreError> {
                self.inner.get(kind, id)
            }

            fn put(
                &self,
                kind: RecordKind,
                id: &str,
                fields: &Value,
                body: &str,
                expected: ExpectedVersion,
            ) -> std::result::Result<u64, StoreError> {
                if expected != ExpectedVersion::Absent
                    && self
                        .conflicts_left
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok()
                {
                    return Err(StoreError::Conflict {
                        kind,
                        id: id.to_string(),
                        expected,
                        actual: None,
                    });
                }
                self.inner.put(kind, id, fields, body, expected)
            }

            fn list(&self, kind: RecordKind) -> std::result::Result<Vec<(String, StoredRecord)>, StoreError> {
                self.inner.list(kind)
            }

            fn delete(&self, kind: RecordKind, id: &str) -> std::result::Result<bool, StoreError> {
                self.inner.delete(kind, id)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let flaky = FlakyStore {
            inner: VaultStore::open(dir.path()).unwrap(),
            conflicts_left: AtomicU32::new(1),
        };
        let store = TypedStore::new(Arc::new(flaky));
        store
            .create(&TaskRecord::new("t", "p", 3, TaskStatus::Running, Utc::now()))
            .unwrap();

        let mut calls = 0;
        let update = store
            .update_with::<TaskRecord, _>("t", 2, |task| {
                calls += 1;
                let mut next = task.clone();
                next.output_summary = "changed".into();
                Ok(Some(next))
            })
            .unwrap();
        assert_eq!(calls, 2);
        assert!(update.changed);
        assert_eq!(update.after.version, 2);
    }

    #[test]
    fn update_with_surfaces_conflict_after_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .create(&TaskRecord::new("t", "p", 3, TaskStatus::Running, Utc::now()))
            .unwrap();

        // Each attempt bumps the record behind the updater's back.
        let err = store
            .update_with::<TaskRecord, _>("t", 1, |task| {
                let current = store.load::<TaskRecord>("t").unwrap();
                store.replace(&current.record, current.version).unwrap();
                Ok(Some(task.clone()))
            })
            .unwrap_err();
        assert!(matches!(err, VaultpilotError::Conflict { .. }));
    }

    #[test]
    fn corrupt_fields_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .raw()
            .put(
                RecordKind::Task,
                "broken",
                &serde_json::json!({"task_id": "broken"}),
                "",
                ExpectedVersion::Absent,
            )
            .unwrap();
        let err = store.load::<TaskRecord>("broken").unwrap_err();
        assert!(matches!(err, VaultpilotError::Fatal(_)));
    }
}
