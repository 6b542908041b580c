//! Configuration file support
//!
//! Loads `<home>/config.toml`. Every section is optional and falls back to
//! defaults; a file that exists but does not parse is a configuration error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vaultpilot_storage::paths;
use vaultpilot_traits::{Result, VaultpilotError};

use crate::backoff::BackoffConfig;
use crate::engine::EngineConfig;
use crate::health::HealthConfig;
use crate::reasoner::ReasonerConfig;
use crate::scheduler::SchedulerConfig;
use crate::supervisor::SupervisorConfig;

const STEP_LOCK_DIR: &str = ".locks";

/// Which record store backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Markdown documents with YAML headers
    #[default]
    Vault,
    /// Embedded redb database
    Redb,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Vault folder; relative paths resolve against the home directory
    pub vault_path: Option<PathBuf>,
    /// Database file for the redb backend
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopHookConfig {
    /// Marker file inside the vault that pauses every task while present
    pub pause_file: String,
}

impl Default for StopHookConfig {
    fn default() -> Self {
        Self {
            pause_file: ".vaultpilot-pause".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultpilotConfig {
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub backoff: BackoffConfig,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,
    pub supervisor: SupervisorConfig,
    pub reasoner: ReasonerConfig,
    pub stop_hook: StopHookConfig,
}

impl VaultpilotConfig {
    /// Load from `<home>/config.toml`.
    pub fn load_from_home(home: &Path) -> Result<Self> {
        Self::load_from_path(&paths::config_path(home))
    }

    /// Load from a specific path. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            VaultpilotError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            VaultpilotError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.backoff.validate()?;
        self.health.validate()?;
        self.scheduler.validate()?;
        self.supervisor.validate()?;

        let pause_file = &self.stop_hook.pause_file;
        if pause_file.is_empty() || pause_file.contains(['/', '\\']) || pause_file == ".." {
            return Err(VaultpilotError::Configuration(format!(
                "stop_hook.pause_file must be a plain file name, got '{pause_file}'"
            )));
        }
        Ok(())
    }

    pub fn vault_path(&self, home: &Path) -> PathBuf {
        match &self.store.vault_path {
            Some(path) => home.join(path),
            None => paths::default_vault_path(home),
        }
    }

    pub fn db_path(&self, home: &Path) -> PathBuf {
        match &self.store.db_path {
            Some(path) => home.join(path),
            None => paths::default_database_path(home),
        }
    }

    pub fn pause_file(&self, home: &Path) -> PathBuf {
        self.vault_path(home).join(&self.stop_hook.pause_file)
    }

    /// Per-task lock files held while a step runs.
    pub fn step_lock_dir(&self, home: &Path) -> PathBuf {
        self.vault_path(home).join(STEP_LOCK_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = VaultpilotConfig::load_from_home(dir.path()).unwrap();
        assert_eq!(config, VaultpilotConfig::default());
        assert_eq!(config.vault_path(dir.path()), dir.path().join("vault"));
        assert_eq!(
            config.pause_file(dir.path()),
            dir.path().join("vault").join(".vaultpilot-pause")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
[store]
backend = "redb"
vault_path = "notes"

[engine]
step_timeout_ms = 5000

[reasoner]
binary = "my-agent"
args = ["--json"]
"#,
        )
        .unwrap();
        let config = VaultpilotConfig::load_from_home(dir.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redb);
        assert_eq!(config.vault_path(dir.path()), dir.path().join("notes"));
        assert_eq!(config.engine.step_timeout_ms, 5000);
        assert_eq!(config.engine.transient_retries, EngineConfig::default().transient_retries);
        assert_eq!(config.reasoner.binary.as_deref(), Some("my-agent"));
        assert_eq!(config.health, HealthConfig::default());
    }

    #[test]
    fn absolute_paths_are_kept() {
        let dir = TempDir::new().unwrap();
        let elsewhere = dir.path().join("elsewhere");
        let config = VaultpilotConfig {
            store: StoreConfig {
                vault_path: Some(elsewhere.clone()),
                ..StoreConfig::default()
            },
            ..VaultpilotConfig::default()
        };
        assert_eq!(config.vault_path(Path::new("/unrelated")), elsewhere);
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[engine\nstep_timeout_ms = ").unwrap();
        let err = VaultpilotConfig::load_from_home(dir.path()).unwrap_err();
        assert!(matches!(err, VaultpilotError::Configuration(_)));
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        let mut config = VaultpilotConfig::default();
        config.backoff.multiplier = 1.0;
        assert!(config.validate().is_err());

        let mut config = VaultpilotConfig::default();
        config.stop_hook.pause_file = "../escape".to_string();
        assert!(config.validate().is_err());

        let mut config = VaultpilotConfig::default();
        config.health.max_restart_attempts = 0;
        assert!(config.validate().is_err());
    }
}
