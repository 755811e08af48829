//! Error types for the store module.

use docchain_core::{Cid, CoreError};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No backend holds the content.
    #[error("content not found: {0}")]
    NotFound(Cid),

    /// Data was found but does not hash to the requested CID, or its
    /// reassembled size disagrees with the DAG.
    #[error("integrity mismatch for {cid}: {reason}")]
    IntegrityMismatch { cid: Cid, reason: String },

    /// Not enough backends accepted the write (or could be reached).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The caller's deadline expired.
    #[error("deadline expired")]
    Timeout,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Chunking or DAG decoding failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the caller may retry (with its own backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::StorageUnavailable(_)
                | StoreError::Timeout
                | StoreError::Database(_)
                | StoreError::Io(_)
        )
    }

    pub(crate) fn task_failed(e: tokio::task::JoinError) -> Self {
        StoreError::StorageUnavailable(format!("background task failed: {e}"))
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        StoreError::StorageUnavailable(format!("{what} lock poisoned"))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
