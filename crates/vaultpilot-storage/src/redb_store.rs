//! Embedded redb backend for the record store.

use anyhow::{Context, Result};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use vaultpilot_traits::{
    ExpectedVersion, RecordKind, RecordStore, StoreError, StoredRecord, validate_record_id,
};

use crate::audit::RedbAuditLog;

const TASK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
const SCHEDULE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("schedules");
const HEALTH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("health");

fn table_for(kind: RecordKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        RecordKind::Task => TASK_TABLE,
        RecordKind::Schedule => SCHEDULE_TABLE,
        RecordKind::Health => HEALTH_TABLE,
    }
}

/// On-disk envelope for one record.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u64,
    fields: Value,
    #[serde(default)]
    body: String,
}

impl Envelope {
    fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Corrupt record envelope")
    }

    fn into_record(self) -> StoredRecord {
        StoredRecord {
            version: self.version,
            fields: self.fields,
            body: self.body,
        }
    }
}

/// Record store kept in a single redb database file.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (and create if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::new(Arc::new(db))
    }

    /// Wrap an existing database, creating the record tables.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        for kind in RecordKind::ALL {
            write_txn.open_table(table_for(kind))?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Audit log sharing this database.
    pub fn audit_log(&self) -> Result<RedbAuditLog> {
        RedbAuditLog::new(self.db.clone())
    }

    fn get_raw(&self, kind: RecordKind, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_for(kind))?;
        Ok(table.get(id)?.map(|value| value.value().to_vec()))
    }

    /// Compare-and-swap inside one write transaction.
    /// `Ok(Err(actual))` means the expectation did not hold.
    fn put_raw(
        &self,
        kind: RecordKind,
        id: &str,
        fields: &Value,
        body: &str,
        expected: ExpectedVersion,
    ) -> Result<std::result::Result<u64, Option<u64>>> {
        let write_txn = self.db.begin_write()?;
        let version = {
            let mut table = write_txn.open_table(table_for(kind))?;
            let current = table.get(id)?.map(|value| value.value().to_vec());
            let actual = match current {
                Some(bytes) => Some(Envelope::decode(&bytes)?.version),
                None => None,
            };
            if !expected.matches(actual) {
                return Ok(Err(actual));
            }

            let envelope = Envelope {
                version: expected.next(),
                fields: fields.clone(),
                body: body.to_string(),
            };
            let bytes = serde_json::to_vec(&envelope)?;
            table.insert(id, bytes.as_slice())?;
            envelope.version
        };
        write_txn.commit()?;
        Ok(Ok(version))
    }

    fn list_raw(&self, kind: RecordKind) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_for(kind))?;

        let mut items = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            items.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(items)
    }

    fn delete_raw(&self, kind: RecordKind, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(table_for(kind))?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}

impl RecordStore for RedbStore {
    fn get(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        validate_record_id(id)?;
        match self.get_raw(kind, id)? {
            Some(bytes) => Ok(Some(Envelope::decode(&bytes)?.into_record())),
            None => Ok(None),
        }
    }

    fn put(
        &self,
        kind: RecordKind,
        id: &str,
        fields: &Value,
        body: &str,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError> {
        validate_record_id(id)?;
        match self.put_raw(kind, id, fields, body, expected)? {
            Ok(version) => Ok(version),
            Err(actual) => Err(StoreError::Conflict {
                kind,
                id: id.to_string(),
                expected,
                actual,
            }),
        }
    }

    fn list(&self, kind: RecordKind) -> Result<Vec<(String, StoredRecord)>, StoreError> {
        let mut records = Vec::new();
        for (id, bytes) in self.list_raw(kind)? {
            records.push((id, Envelope::decode(&bytes)?.into_record()));
        }
        Ok(records)
    }

    fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, StoreError> {
        validate_record_id(id)?;
        Ok(self.delete_raw(kind, id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> RedbStore {
        RedbStore::open(dir.path().join("test.db")).unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let fields = json!({"id": "s1", "enabled": true, "cron_expression": "0 8 * * *"});

        store
            .put(RecordKind::Schedule, "s1", &fields, "body", ExpectedVersion::Absent)
            .unwrap();
        let record = store.get(RecordKind::Schedule, "s1").unwrap().unwrap();
        assert_eq!(
            record,
            StoredRecord {
                version: 1,
                fields,
                body: "body".into()
            }
        );
    }

    #[test]
    fn compare_and_swap_detects_stale_writers() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let v1 = store
            .put(RecordKind::Task, "t", &json!({"n": 1}), "", ExpectedVersion::Absent)
            .unwrap();
        let v2 = store
            .put(RecordKind::Task, "t", &json!({"n": 2}), "", ExpectedVersion::Exact(v1))
            .unwrap();
        assert_eq!(v2, 2);

        let err = store
            .put(RecordKind::Task, "t", &json!({"n": 3}), "", ExpectedVersion::Exact(v1))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                actual: Some(2),
                ..
            }
        ));
        let record = store.get(RecordKind::Task, "t").unwrap().unwrap();
        assert_eq!(record.fields["n"], 2);
    }

    #[test]
    fn kinds_are_isolated() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .put(RecordKind::Task, "same", &json!({}), "", ExpectedVersion::Absent)
            .unwrap();
        assert!(store.get(RecordKind::Health, "same").unwrap().is_none());
        assert_eq!(store.list(RecordKind::Task).unwrap().len(), 1);
        assert!(store.list(RecordKind::Schedule).unwrap().is_empty());
        assert!(store.delete(RecordKind::Task, "same").unwrap());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(&dir);
            store
                .put(RecordKind::Health, "scheduler", &json!({"status": "healthy"}), "", ExpectedVersion::Absent)
                .unwrap();
        }
        let store = open_store(&dir);
        let record = store.get(RecordKind::Health, "scheduler").unwrap().unwrap();
        assert_eq!(record.fields["status"], "healthy");
    }
}
