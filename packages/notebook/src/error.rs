// ABOUTME: Error types for notebook persistence
// ABOUTME: Database, serialization and lookup failures surfaced by the storage layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid reorder: {0}")]
    InvalidReorder(String),

    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
