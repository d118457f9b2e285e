//! Engine configuration.
//!
//! Values come from an optional `sync.toml` in the repohub config directory and
//! are then overridden by environment variables:
//!
//! | variable                 | field                    | default |
//! |--------------------------|--------------------------|---------|
//! | `SYNC_SERVER_ONLY`       | `server_only`            | false   |
//! | `SYNC_SECRET_KEY`        | `secret_key`             | unset   |
//! | `AUTO_SYNC_DAYS`         | `auto_sync_days`         | 1       |
//! | `PRUNE_GRACE_DAYS`       | `prune_grace_days`       | 0       |
//! | `PRUNE_HARD_DELETE_DAYS` | `prune_hard_delete_days` | 0       |
//! | `REPOHUB_DB_PATH`        | `db_path`                | data dir |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::paths;
use crate::platform::SyncTarget;

pub const ENV_SERVER_ONLY: &str = "SYNC_SERVER_ONLY";
pub const ENV_SECRET_KEY: &str = "SYNC_SECRET_KEY";
pub const ENV_AUTO_SYNC_DAYS: &str = "AUTO_SYNC_DAYS";
pub const ENV_PRUNE_GRACE_DAYS: &str = "PRUNE_GRACE_DAYS";
pub const ENV_PRUNE_HARD_DELETE_DAYS: &str = "PRUNE_HARD_DELETE_DAYS";
pub const ENV_DB_PATH: &str = "REPOHUB_DB_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub server_only: bool,
    pub secret_key: Option<String>,
    pub auto_sync_days: u32,
    pub prune_grace_days: u32,
    pub prune_hard_delete_days: u32,
    pub db_path: Option<PathBuf>,
    /// Package feed location (URL or local path) per sync target
    pub feeds: BTreeMap<SyncTarget, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_only: false,
            secret_key: None,
            auto_sync_days: Self::DEFAULT_AUTO_SYNC_DAYS,
            prune_grace_days: 0,
            prune_hard_delete_days: 0,
            db_path: None,
            feeds: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    pub const DEFAULT_AUTO_SYNC_DAYS: u32 = 1;

    /// Load the config file (if any) and apply process environment overrides
    pub fn load() -> Result<Self> {
        let path = paths::config_file_path()?;
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from environment-style variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_SERVER_ONLY) {
            self.server_only = parse_flag(&v);
        }
        if let Some(v) = lookup(ENV_SECRET_KEY) {
            self.secret_key = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup(ENV_AUTO_SYNC_DAYS) {
            self.auto_sync_days = parse_days(&v, Self::DEFAULT_AUTO_SYNC_DAYS);
        }
        if let Some(v) = lookup(ENV_PRUNE_GRACE_DAYS) {
            self.prune_grace_days = parse_days(&v, 0);
        }
        if let Some(v) = lookup(ENV_PRUNE_HARD_DELETE_DAYS) {
            self.prune_hard_delete_days = parse_days(&v, 0);
        }
        if let Some(v) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.db_path = Some(PathBuf::from(v));
        }
    }

    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => paths::default_db_path(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

/// Unparsable values fall back to `fallback`, negative values clamp to zero
fn parse_days(value: &str, fallback: u32) -> u32 {
    match value.trim().parse::<i64>() {
        Ok(days) => days.clamp(0, u32::MAX as i64) as u32,
        Err(_) => fallback,
    }
}
