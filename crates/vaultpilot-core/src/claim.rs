//! "One at a time per id" guards.
//!
//! [`InFlight`] covers one process. [`LockDir`] extends a claim to every
//! process sharing the directory through an exclusive OS lock on
//! `<dir>/<id>.lock`.

use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Ids with an operation in flight.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Claim `id`, or `None` if it is already claimed.
    pub(crate) fn try_claim(&self, id: &str) -> Option<Claim> {
        if !self.ids.lock().insert(id.to_string()) {
            return None;
        }
        Some(Claim {
            ids: self.ids.clone(),
            id: id.to_string(),
        })
    }
}

/// Releases its id when dropped.
pub(crate) struct Claim {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}

/// Directory of per-id lock files.
#[derive(Debug, Clone)]
pub(crate) struct LockDir {
    dir: PathBuf,
}

impl LockDir {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Lock `id` without waiting. `None` if another handle holds it. The
    /// lock is released when the returned file is dropped.
    pub(crate) fn try_lock(&self, id: &str) -> io::Result<Option<File>> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(format!("{id}.lock")))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(file)),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let in_flight = InFlight::default();
        let claim = in_flight.try_claim("t1").unwrap();
        assert!(in_flight.try_claim("t1").is_none());
        assert!(in_flight.try_claim("t2").is_some());
        drop(claim);
        assert!(in_flight.try_claim("t1").is_some());
    }

    #[test]
    fn lock_files_exclude_other_handles() {
        let dir = TempDir::new().unwrap();
        let first = LockDir::new(dir.path().join("locks"));
        let second = LockDir::new(dir.path().join("locks"));

        let held = first.try_lock("t1").unwrap().unwrap();
        assert!(second.try_lock("t1").unwrap().is_none());
        assert!(second.try_lock("t2").unwrap().is_some());
        drop(held);
        assert!(second.try_lock("t1").unwrap().is_some());
    }
}
