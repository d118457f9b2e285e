#![allow(dead_code)]

use anyhow::Result;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch directory holding a package database, feeds and a config home
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.path().join("packages.db")
    }

    /// Directory to point `XDG_CONFIG_HOME` at
    pub fn config_home(&self) -> PathBuf {
        self.path().join("config")
    }

    /// Write a JSON feed listing `names` and return its path
    pub fn write_feed(&self, file: &str, names: &[&str]) -> Result<PathBuf> {
        let entries: Vec<Value> = names
            .iter()
            .map(|name| json!({ "name": name, "version": "1.0", "description": format!("{name} package") }))
            .collect();
        let path = self.path().join(file);
        std::fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
        Ok(path)
    }

    /// Write `repohub/sync.toml` under the config home
    pub fn write_config(&self, contents: &str) -> Result<PathBuf> {
        let dir = self.config_home().join("repohub");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("sync.toml");
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}
