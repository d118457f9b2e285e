use thiserror::Error;

use crate::platform::SyncTarget;
use crate::sync::auth::DenyReason;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync operation not allowed: {0}")]
    Denied(DenyReason),

    #[error("Sync already in progress for {0}")]
    AlreadyRunning(SyncTarget),

    #[error("Automatic sync sweep already in progress")]
    SweepRunning,

    #[error("Failed to fetch packages: {0}")]
    Fetch(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Sync task aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    /// HTTP-equivalent status for a failure surfaced to a caller
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::Denied(_) => 403,
            SyncError::AlreadyRunning(_) | SyncError::SweepRunning => 409,
            SyncError::NotFound(_) => 404,
            SyncError::Fetch(_)
            | SyncError::Store(_)
            | SyncError::Configuration(_)
            | SyncError::Aborted(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Fetch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
