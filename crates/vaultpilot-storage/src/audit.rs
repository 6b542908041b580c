//! Append-only audit logs.

use anyhow::{Context, Result};
use fs2::FileExt;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vaultpilot_traits::{AuditEvent, AuditQuery, AuditSink, StoreError};

const AUDIT_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_events");

const AUDIT_DIR: &str = "audit";
const AUDIT_FILE: &str = "events.jsonl";

/// Audit log stored as one JSON object per line inside the vault.
///
/// Appends hold an exclusive OS lock on the file, so handles in separate
/// processes never assign the same sequence number.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    /// File length and sequence after this handle's last append
    tail: Mutex<Option<(u64, u64)>>,
}

impl JsonlAuditLog {
    /// Open the log at `<vault_root>/audit/events.jsonl`.
    pub fn open_in_vault(vault_root: &Path) -> Result<Self> {
        let dir = vault_root.join(AUDIT_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create audit folder {}", dir.display()))?;
        Ok(Self {
            path: dir.join(AUDIT_FILE),
            tail: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<AuditEvent>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to open {}", self.path.display()));
            }
        };

        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line).with_context(|| {
                format!("Corrupt audit line {} in {}", index + 1, self.path.display())
            })?;
            events.push(event);
        }
        Ok(events)
    }

    fn append_line(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let mut tail = self.tail.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", self.path.display()))?;

        // Re-read only when another handle appended since our last write.
        let len = file.metadata()?.len();
        let previous = match *tail {
            Some((known_len, sequence)) if known_len == len => sequence,
            _ => self.read_all()?.last().map(|e| e.sequence).unwrap_or(0),
        };
        event.sequence = previous + 1;

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;

        *tail = Some((file.metadata()?.len(), event.sequence));
        Ok(event)
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, event: AuditEvent) -> Result<AuditEvent, StoreError> {
        Ok(self.append_line(event)?)
    }

    fn list(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(query.apply(self.read_all()?))
    }
}

/// Audit log stored in a redb table keyed by sequence number.
#[derive(Clone)]
pub struct RedbAuditLog {
    db: Arc<Database>,
}

impl RedbAuditLog {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(AUDIT_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn append_raw(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_TABLE)?;
            let previous = table.last()?.map(|(key, _)| key.value()).unwrap_or(0);
            event.sequence = previous + 1;
            let bytes = serde_json::to_vec(&event)?;
            table.insert(event.sequence, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(event)
    }

    fn list_raw(&self) -> Result<Vec<AuditEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_TABLE)?;

        let mut events = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            events.push(serde_json::from_slice(value.value()).context("Corrupt audit event")?);
        }
        Ok(events)
    }
}

impl AuditSink for RedbAuditLog {
    fn append(&self, event: AuditEvent) -> Result<AuditEvent, StoreError> {
        Ok(self.append_raw(event)?)
    }

    fn list(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(query.apply(self.list_raw()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RedbStore;
    use tempfile::tempdir;

    fn sample(subject: &str) -> AuditEvent {
        AuditEvent::new("engine", "task.stepped", subject, "ok")
    }

    #[test]
    fn jsonl_assigns_sequences_in_arrival_order() {
        let dir = tempdir().unwrap();
        let log = JsonlAuditLog::open_in_vault(dir.path()).unwrap();
        let first = log.append(sample("a")).unwrap();
        let second = log.append(sample("b")).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        let events = log.list(&AuditQuery::default()).unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[test]
    fn jsonl_continues_sequence_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let log = JsonlAuditLog::open_in_vault(dir.path()).unwrap();
            log.append(sample("a")).unwrap();
            log.append(sample("a")).unwrap();
        }
        let log = JsonlAuditLog::open_in_vault(dir.path()).unwrap();
        let third = log.append(sample("a")).unwrap();
        assert_eq!(third.sequence, 3);
    }

    #[test]
    fn jsonl_handles_on_one_file_share_the_sequence() {
        use std::thread;

        let dir = tempdir().unwrap();
        let first = Arc::new(JsonlAuditLog::open_in_vault(dir.path()).unwrap());
        let second = Arc::new(JsonlAuditLog::open_in_vault(dir.path()).unwrap());
        first.append(sample("warmup")).unwrap();
        second.append(sample("warmup")).unwrap();

        let writers: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|log| {
                thread::spawn(move || {
                    for _ in 0..25 {
                        log.append(sample("a")).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let sequences: Vec<u64> = first
            .list(&AuditQuery::default())
            .unwrap()
            .into_iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, (1..=52).collect::<Vec<u64>>());
    }

    #[test]
    fn redb_log_filters_by_subject() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("audit.db")).unwrap();
        let log = store.audit_log().unwrap();
        log.append(sample("a")).unwrap();
        log.append(sample("b")).unwrap();
        log.append(sample("a").with_detail("second")).unwrap();

        let events = log
            .list(&AuditQuery {
                subject: Some("a".into()),
                limit: None,
            })
            .unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 3]);
        assert_eq!(events[1].detail.as_deref(), Some("second"));
    }
}
