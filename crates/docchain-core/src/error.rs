//! Error types for DocChain core.

use thiserror::Error;

/// Core errors that can occur while encoding, decoding or checking primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid CID: {0}")]
    InvalidCid(String),

    #[error("malformed DAG node: {0}")]
    MalformedNode(String),

    #[error("malformed ledger record: {0}")]
    MalformedRecord(String),

    #[error("invalid chunking configuration: {0}")]
    InvalidChunking(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Errors raised when a ledger record does not extend the chain it is appended to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("invalid sequence number: expected {expected}, got {got}")]
    InvalidSequence { expected: u64, got: u64 },

    #[error("prev_hash does not match chain head at seq {seq}")]
    BrokenLink { seq: u64 },

    #[error("timestamp went backwards at seq {seq}: {timestamp} < {previous}")]
    TimestampRegressed {
        seq: u64,
        timestamp: i64,
        previous: i64,
    },

    #[error("attestation signature failed at seq {seq}")]
    BadAttestation { seq: u64 },

    #[error("record hash mismatch at seq {seq}")]
    HashMismatch { seq: u64 },
}

impl LinkError {
    /// The sequence number of the offending record.
    pub fn seq(&self) -> u64 {
        match self {
            LinkError::InvalidSequence { got, .. } => *got,
            LinkError::BrokenLink { seq }
            | LinkError::TimestampRegressed { seq, .. }
            | LinkError::BadAttestation { seq }
            | LinkError::HashMismatch { seq } => *seq,
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
