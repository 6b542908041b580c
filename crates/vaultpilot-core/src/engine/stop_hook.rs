//! Stop hooks checked at step boundaries.
//!
//! A hook that returns a reason makes the engine pause the task instead of
//! running the next step. Progress persisted so far is kept.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::TaskRecord;

pub trait StopHook: Send + Sync {
    /// Reason to pause before the next step, or `None` to continue.
    fn stop_requested(&self, task: &TaskRecord) -> Option<String>;
}

/// Never requests a stop.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverStop;

impl StopHook for NeverStop {
    fn stop_requested(&self, _task: &TaskRecord) -> Option<String> {
        None
    }
}

/// In-process global pause switch.
#[derive(Debug, Default, Clone)]
pub struct FlagStopHook {
    flag: Arc<AtomicBool>,
}

impl FlagStopHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl StopHook for FlagStopHook {
    fn stop_requested(&self, _task: &TaskRecord) -> Option<String> {
        self.is_set().then(|| "global pause requested".to_string())
    }
}

/// Pause requested while a marker file exists (shared across processes).
#[derive(Debug, Clone)]
pub struct PauseFileHook {
    path: PathBuf,
}

impl PauseFileHook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn is_paused(&self) -> bool {
        self.path.exists()
    }

    /// Create the marker. Idempotent.
    pub fn pause(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, "paused\n")
    }

    /// Remove the marker. Returns whether it existed.
    pub fn resume(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl StopHook for PauseFileHook {
    fn stop_requested(&self, _task: &TaskRecord) -> Option<String> {
        self.is_paused()
            .then(|| format!("pause file {} present", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use chrono::Utc;

    fn task() -> TaskRecord {
        TaskRecord::new("t1", "p", 3, TaskStatus::Running, Utc::now())
    }

    #[test]
    fn flag_hook_toggles() {
        let hook = FlagStopHook::new();
        assert!(hook.stop_requested(&task()).is_none());
        hook.clone().request_stop();
        assert!(hook.stop_requested(&task()).is_some());
        hook.clear();
        assert!(hook.stop_requested(&task()).is_none());
    }

    #[test]
    fn pause_file_hook_follows_marker() {
        let dir = tempfile::tempdir().unwrap();
        let hook = PauseFileHook::new(dir.path().join(".vaultpilot-pause"));
        assert!(hook.stop_requested(&task()).is_none());
        hook.pause().unwrap();
        assert!(hook.stop_requested(&task()).unwrap().contains("pause file"));
        assert!(hook.resume().unwrap());
        assert!(!hook.resume().unwrap());
        assert!(hook.stop_requested(&task()).is_none());
    }
}
