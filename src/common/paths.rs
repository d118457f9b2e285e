use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for repohub-sync

/// Get the repohub config directory (not created, the config file is optional)
pub fn repohub_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("repohub"))
}

/// Get the repohub data directory
pub fn repohub_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .context("Unable to determine user data directory")?
        .join("repohub");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory at {}", data_dir.display()))?;

    Ok(data_dir)
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(repohub_config_dir()?.join("sync.toml"))
}

pub fn default_db_path() -> Result<PathBuf> {
    Ok(repohub_data_dir()?.join("packages.db"))
}
