#![allow(dead_code)]

use anyhow::Result;
use serde_json::Value;
use std::process::Command;

use crate::common::TestEnvironment;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Parse stdout as JSON lines, skipping anything that is not JSON
    pub fn events(&self) -> Vec<Value> {
        self.stdout
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn has_event(&self, code: &str) -> bool {
        self.events().iter().any(|e| e["code"] == code)
    }
}

/// Run the built binary with its config and database inside `env`
pub fn run_repohub_command(env: &TestEnvironment, args: &[&str]) -> Result<CommandOutput> {
    let output = Command::new(env!("CARGO_BIN_EXE_repohub-sync"))
        .args(args)
        .env("XDG_CONFIG_HOME", env.config_home())
        .env("REPOHUB_DB_PATH", env.db_path())
        .env_remove("SYNC_SERVER_ONLY")
        .env_remove("SYNC_SECRET_KEY")
        .env_remove("AUTO_SYNC_DAYS")
        .env_remove("PRUNE_GRACE_DAYS")
        .env_remove("PRUNE_HARD_DELETE_DAYS")
        .output()?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
