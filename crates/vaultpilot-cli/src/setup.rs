//! CLI setup module
//!
//! Resolves the home directory and configuration, then opens the core.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use vaultpilot_core::config::VaultpilotConfig;
use vaultpilot_core::{AppCore, paths};

/// `--home` / `$VAULTPILOT_HOME`, else `~/.vaultpilot`.
pub fn resolve_home(home: Option<PathBuf>) -> Result<PathBuf> {
    match home {
        Some(home) if !home.as_os_str().is_empty() => Ok(home),
        _ => paths::resolve_home_dir(),
    }
}

/// Load `<home>/config.toml`, applying the `--vault` override.
pub fn load_config(home: &Path, vault: Option<&Path>) -> Result<VaultpilotConfig> {
    let mut config = VaultpilotConfig::load_from_home(home)?;
    if let Some(vault) = vault {
        let vault = std::path::absolute(vault)
            .with_context(|| format!("Invalid vault path {}", vault.display()))?;
        config.store.vault_path = Some(vault);
    }
    Ok(config)
}

pub fn prepare_core(home: &Path, config: VaultpilotConfig) -> Result<AppCore> {
    AppCore::open(home, config)
}
