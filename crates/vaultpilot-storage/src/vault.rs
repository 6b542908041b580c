//! Markdown vault backend for the record store.
//!
//! Each record lives in `<root>/<collection>/<id>.md`. Writes go to a temp
//! file in the same directory and are renamed over the target, so readers
//! never observe a half-written document. Compare-and-swap holds an
//! exclusive OS lock on `<collection>/.lock`, so store handles in separate
//! processes (the daemon and CLI commands) serialize on the same vault.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use vaultpilot_traits::{
    ExpectedVersion, RecordKind, RecordStore, StoreError, StoredRecord, validate_record_id,
};

use crate::frontmatter;

const RECORD_EXTENSION: &str = "md";
const LOCK_FILE: &str = ".lock";

/// Record store backed by a folder of markdown documents.
#[derive(Debug)]
pub struct VaultStore {
    root: PathBuf,
}

impl VaultStore {
    /// Open (and create if needed) a vault rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in RecordKind::ALL {
            let dir = root.join(kind.collection());
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create vault folder {}", dir.display()))?;
        }
        debug!(root = %root.display(), "Opened vault store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.root
            .join(kind.collection())
            .join(format!("{id}.{RECORD_EXTENSION}"))
    }

    /// Exclusive lock over one collection, released when the file drops.
    fn lock_collection(&self, kind: RecordKind) -> Result<File> {
        let path = self.root.join(kind.collection()).join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(file)
    }

    fn read_record(path: &Path) -> Result<Option<StoredRecord>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let doc = frontmatter::parse(&text)
            .with_context(|| format!("Malformed record document {}", path.display()))?;
        Ok(Some(StoredRecord {
            version: doc.revision,
            fields: doc.fields,
            body: doc.body,
        }))
    }

    fn write_atomically(path: &Path, contents: &str) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Record path {} has no parent", path.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

impl RecordStore for VaultStore {
    fn get(&self, kind: RecordKind, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        validate_record_id(id)?;
        Ok(Self::read_record(&self.record_path(kind, id))?)
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
        let path = self.record_path(kind, id);

        let _lock = self.lock_collection(kind)?;
        let actual = Self::read_record(&path)?.map(|r| r.version);
        if !expected.matches(actual) {
            return Err(StoreError::Conflict {
                kind,
                id: id.to_string(),
                expected,
                actual,
            });
        }

        let version = expected.next();
        let document = frontmatter::render(version, fields, body)?;
        Self::write_atomically(&path, &document)?;
        debug!(kind = %kind, id = %id, version, "Wrote vault record");
        Ok(version)
    }

    fn list(&self, kind: RecordKind) -> Result<Vec<(String, StoredRecord)>, StoreError> {
        let dir = self.root.join(kind.collection());
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.context("Failed to read vault entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_record_id(id).is_err() {
                continue;
            }
            let id = id.to_string();
            if let Some(record) = Self::read_record(&path)? {
                records.push((id, record));
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn delete(&self, kind: RecordKind, id: &str) -> Result<bool, StoreError> {
        validate_record_id(id)?;
        let path = self.record_path(kind, id);
        let _lock = self.lock_collection(kind)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("Failed to delete {}", path.display()))
                .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        let fields = json!({"task_id": "t1", "iteration": 0});

        let version = store
            .put(RecordKind::Task, "t1", &fields, "# t1\n", ExpectedVersion::Absent)
            .unwrap();
        assert_eq!(version, 1);

        let record = store.get(RecordKind::Task, "t1").unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.fields, fields);
        assert_eq!(record.body, "# t1\n");
        assert!(dir.path().join("tasks").join("t1.md").exists());
    }

    #[test]
    fn stale_version_conflicts() {
        let dir = tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        let fields = json!({"n": 1});
        store
            .put(RecordKind::Schedule, "s", &fields, "", ExpectedVersion::Absent)
            .unwrap();
        store
            .put(RecordKind::Schedule, "s", &fields, "", ExpectedVersion::Exact(1))
            .unwrap();

        let err = store
            .put(RecordKind::Schedule, "s", &fields, "", ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                actual: Some(2),
                ..
            }
        ));

        let err = store
            .put(RecordKind::Schedule, "s", &fields, "", ExpectedVersion::Absent)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn list_is_sorted_and_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        for id in ["b", "a", "c"] {
            store
                .put(RecordKind::Health, id, &json!({"component_id": id}), "", ExpectedVersion::Absent)
                .unwrap();
        }
        fs::write(dir.path().join("health").join("notes.txt"), "ignore me").unwrap();

        let ids: Vec<String> = store
            .list(RecordKind::Health)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn delete_reports_existence() {
        let dir = tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        store
            .put(RecordKind::Task, "gone", &json!({}), "", ExpectedVersion::Absent)
            .unwrap();
        assert!(store.delete(RecordKind::Task, "gone").unwrap());
        assert!(!store.delete(RecordKind::Task, "gone").unwrap());
        assert!(store.get(RecordKind::Task, "gone").unwrap().is_none());
    }

    #[test]
    fn separate_handles_serialize_compare_and_swap() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let dir = tempdir().unwrap();
        let first = Arc::new(VaultStore::open(dir.path()).unwrap());
        let second = Arc::new(VaultStore::open(dir.path()).unwrap());
        first
            .put(RecordKind::Schedule, "s", &json!({"n": 0}), "", ExpectedVersion::Absent)
            .unwrap();

        for round in 1..=50u64 {
            let barrier = Arc::new(Barrier::new(2));
            let writers: Vec<_> = [first.clone(), second.clone()]
                .into_iter()
                .enumerate()
                .map(|(writer, store)| {
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        store
                            .put(
                                RecordKind::Schedule,
                                "s",
                                &json!({"writer": writer}),
                                "",
                                ExpectedVersion::Exact(round),
                            )
                            .is_ok()
                    })
                })
                .collect();
            let winners = writers
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1, "round {round}");
        }
        assert_eq!(second.get(RecordKind::Schedule, "s").unwrap().unwrap().version, 51);
    }

    #[test]
    fn lock_file_is_not_listed() {
        let dir = tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        store
            .put(RecordKind::Task, "t1", &json!({}), "", ExpectedVersion::Absent)
            .unwrap();
        assert!(dir.path().join("tasks").join(LOCK_FILE).exists());
        assert_eq!(store.list(RecordKind::Task).unwrap().len(), 1);
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        let err = store.get(RecordKind::Task, "../escape").unwrap_err();
        assert!(matches!(err, StoreError::InvalidId(_)));
    }
}
