//! Path utilities for vaultpilot directory resolution.

use anyhow::Result;
use std::path::PathBuf;

const VAULTPILOT_DIR: &str = ".vaultpilot";
const DB_FILE: &str = "vaultpilot.db";
const CONFIG_FILE: &str = "config.toml";
const VAULT_DIR: &str = "vault";
const LOGS_DIR: &str = "logs";

/// Environment variable to override the vaultpilot home directory.
pub const VAULTPILOT_HOME_ENV: &str = "VAULTPILOT_HOME";

/// Resolve the vaultpilot home directory.
/// Priority: VAULTPILOT_HOME env var > ~/.vaultpilot/
pub fn resolve_home_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(VAULTPILOT_HOME_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(VAULTPILOT_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure a directory exists and return it.
pub fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn config_path(home: &std::path::Path) -> PathBuf {
    home.join(CONFIG_FILE)
}

pub fn default_vault_path(home: &std::path::Path) -> PathBuf {
    home.join(VAULT_DIR)
}

pub fn default_database_path(home: &std::path::Path) -> PathBuf {
    home.join(DB_FILE)
}

pub fn logs_dir(home: &std::path::Path) -> PathBuf {
    home.join(LOGS_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn derived_paths_live_under_home() {
        let home = Path::new("/tmp/vp-home");
        assert_eq!(config_path(home), home.join("config.toml"));
        assert_eq!(default_vault_path(home), home.join("vault"));
        assert_eq!(default_database_path(home), home.join("vaultpilot.db"));
        assert_eq!(logs_dir(home), home.join("logs"));
    }
}
