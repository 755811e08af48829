//! Error types for DocChain.

use docchain_access::AccessError;
use docchain_core::{Cid, CoreError, Identity};
use docchain_ledger::LedgerError;
use docchain_store::StoreError;
use thiserror::Error;

/// Errors that can occur during DocChain operations.
#[derive(Debug, Error)]
pub enum DocChainError {
    /// Content store error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Registry ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Access overlay error.
    #[error("access error: {0}")]
    Access(#[from] AccessError),

    /// Hashing or chunking error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The reader may not fetch this document.
    #[error("{reader} may not read {cid}")]
    AccessDenied { cid: Cid, reader: Identity },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocChainError {
    /// Whether the caller may retry (with its own backoff).
    ///
    /// Policy violations, denials and corruption are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            DocChainError::Store(e) => e.is_retryable(),
            DocChainError::Ledger(e) => e.is_retryable(),
            DocChainError::Access(e) => e.is_retryable(),
            DocChainError::Io(_) => true,
            DocChainError::Core(_)
            | DocChainError::AccessDenied { .. }
            | DocChainError::Config(_)
            | DocChainError::ConfigParse(_) => false,
        }
    }

    /// Whether the error means the deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DocChainError::Store(StoreError::Timeout)
                | DocChainError::Ledger(LedgerError::Timeout)
                | DocChainError::Access(AccessError::Timeout)
                | DocChainError::Access(AccessError::Ledger(LedgerError::Timeout))
        )
    }
}

/// Result type for DocChain operations.
pub type Result<T> = std::result::Result<T, DocChainError>;
