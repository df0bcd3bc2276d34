// ABOUTME: Error types for the execution runtime
// ABOUTME: Separates lock conflicts and sandbox outages from persistence failures

use cellar_notebook::StorageError;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Cell {cell_id} is locked by {holder}")]
    Conflict {
        cell_id: String,
        holder: String,
        since: Option<DateTime<Utc>>,
    },

    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StorageError> for RuntimeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => RuntimeError::NotFound(what),
            other => RuntimeError::Storage(other),
        }
    }
}

impl RuntimeError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RuntimeError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
