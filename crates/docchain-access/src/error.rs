//! Error types for the access module.

use docchain_core::{Cid, Identity};
use docchain_ledger::LedgerError;
use thiserror::Error;

/// Errors that can occur during access control operations.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The grantor has no active registration of the CID.
    #[error("{caller} does not own an active entry for {cid}")]
    NotOwner { cid: Cid, caller: Identity },

    /// The grant request is malformed (self-grant, expiry in the past).
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// The caller's deadline expired.
    #[error("deadline expired")]
    Timeout,

    /// Registry or journal failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl AccessError {
    /// Whether the caller may retry (with its own backoff).
    pub fn is_retryable(&self) -> bool {
        match self {
            AccessError::Timeout => true,
            AccessError::Ledger(e) => e.is_retryable(),
            AccessError::NotOwner { .. } | AccessError::InvalidGrant(_) => false,
        }
    }

    pub(crate) fn poisoned() -> Self {
        AccessError::Ledger(LedgerError::Unavailable(
            "permission state lock poisoned".into(),
        ))
    }
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
