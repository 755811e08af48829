//! Error types for the ledger module.

use docchain_core::{Cid, CoreError, Identity, LinkError};
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An active entry already exists (for this CID+owner, or this CID
    /// under the exclusive policy).
    #[error("{cid} is already registered by {owner}")]
    AlreadyRegistered { cid: Cid, owner: Identity },

    /// The caller's entry for this CID is already revoked.
    #[error("{0} is already revoked")]
    AlreadyRevoked(Cid),

    /// The caller does not own the entry.
    #[error("{caller} does not own {cid}")]
    NotOwner { cid: Cid, caller: Identity },

    /// No (active) entry exists for the CID.
    #[error("no active entry for {0}")]
    NotFound(Cid),

    /// No record at this sequence number.
    #[error("no record at seq {0}")]
    NoSuchRecord(u64),

    /// The caller's deadline expired.
    #[error("deadline expired")]
    Timeout,

    /// The backing ledger cannot be reached or could not commit.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// An earlier unconfirmed append was committed late; re-read state before retrying.
    #[error("earlier append committed at seq {seq}; state changed")]
    Reconciled { seq: u64 },

    /// Persisted history fails validation.
    #[error("ledger tampered at seq {seq}: {reason}")]
    Tampered { seq: u64, reason: String },

    /// A replica refused a record that does not extend its chain.
    #[error("record rejected: {0}")]
    Rejected(#[from] LinkError),

    /// A replica is missing records before the one offered.
    #[error("replica is behind: has seq {have}, offered {offered}")]
    Behind { have: u64, offered: u64 },

    /// A different record already occupies this position.
    #[error("conflicting record at seq {0}")]
    Conflict(u64),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Record encoding or decoding failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Whether the caller may retry (with its own backoff).
    ///
    /// Policy violations and tamper are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout
                | LedgerError::Unavailable(_)
                | LedgerError::Reconciled { .. }
                | LedgerError::Database(_)
                | LedgerError::Io(_)
        )
    }

    pub(crate) fn tampered(seq: u64, reason: impl Into<String>) -> Self {
        LedgerError::Tampered {
            seq,
            reason: reason.into(),
        }
    }

    pub(crate) fn task_failed(e: tokio::task::JoinError) -> Self {
        LedgerError::Unavailable(format!("background task failed: {e}"))
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        LedgerError::Unavailable(format!("{what} lock poisoned"))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
