//! The append-only log abstraction behind the registry.
//!
//! A [`LedgerLog`] turns record bodies into attested, hash-chained
//! [`LedgerRecord`]s and persists them. A [`Replica`] is the passive side: it
//! accepts records built elsewhere, checking that each one extends its chain.
//! Every backend is both, so any of them can serve as a quorum member.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use docchain_core::{
    validate_link, Blake3Hash, ChainHead, Clock, Identity, Keypair, LedgerRecord, LinkError,
    RecordBody,
};

use crate::error::{LedgerError, Result};

/// The ledger operator: signs records and stamps them with ledger time.
#[derive(Clone)]
pub struct Attestor {
    operator: Keypair,
    clock: Arc<dyn Clock>,
}

impl Attestor {
    pub fn new(operator: Keypair, clock: Arc<dyn Clock>) -> Self {
        Self { operator, clock }
    }

    /// The operator's public key.
    pub fn identity(&self) -> Identity {
        self.operator.identity()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Build the record that extends `head` with `body`.
    ///
    /// The timestamp is the clock reading, clamped so it never precedes the head.
    pub fn attest(&self, head: Option<&ChainHead>, body: RecordBody) -> LedgerRecord {
        let (seq, prev_hash, floor) = match head {
            Some(h) => (h.seq + 1, h.hash, h.timestamp),
            None => (1, Blake3Hash::ZERO, i64::MIN),
        };
        let timestamp = self.clock.now_millis().max(floor);
        LedgerRecord::attest(seq, prev_hash, timestamp, body, &self.operator)
    }
}

impl fmt::Debug for Attestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attestor({})", self.identity())
    }
}

/// Outcome of offering a record to a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// The record was appended.
    Appended,
    /// The identical record was already present (idempotent).
    AlreadyPresent,
}

/// An append-only, tamper-evident log of ledger records.
///
/// # Design Notes
///
/// - **Atomic append**: `append` assigns seq, prev hash, timestamp and
///   attestation under the backend's own lock, so one log may be shared by
///   several writers.
/// - **Sequence numbers** start at 1 and are contiguous.
/// - **Reads** return records in sequence order.
#[async_trait]
pub trait LedgerLog: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// The identity that attests appended records.
    fn attestor(&self) -> Identity;

    /// Append a record carrying `body`, returning it as committed.
    async fn append(&self, body: RecordBody) -> Result<LedgerRecord>;

    /// Read up to `limit` records starting at `from` (1-based).
    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>>;

    /// The current chain head, if any record exists.
    async fn head(&self) -> Result<Option<ChainHead>>;

    /// Re-validate the whole chain from genesis.
    ///
    /// Returns the head on success, `Tampered` at the first bad record.
    async fn verify_chain(&self) -> Result<Option<ChainHead>>;

    /// Read every record from `from` to the head.
    async fn read_from(&self, from: u64) -> Result<Vec<LedgerRecord>> {
        self.read_range(from, usize::MAX).await
    }

    /// Read the record at `seq`.
    async fn record(&self, seq: u64) -> Result<LedgerRecord> {
        self.read_range(seq, 1)
            .await?
            .into_iter()
            .find(|r| r.seq == seq)
            .ok_or(LedgerError::NoSuchRecord(seq))
    }
}

/// A member of a replicated ledger.
#[async_trait]
pub trait Replica: Send + Sync {
    fn name(&self) -> &str;

    /// Append a record built by the leader, if it extends this replica's chain.
    ///
    /// Re-offering a record already held is not an error. A record past the
    /// head yields `Behind`; a different record at a held position yields
    /// `Conflict`.
    async fn accept(&self, record: &LedgerRecord) -> Result<Accepted>;

    /// Read up to `limit` records starting at `from`.
    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>>;

    /// The replica's chain head.
    async fn head(&self) -> Result<Option<ChainHead>>;
}

/// Decide what a replica should do with an offered record.
///
/// `hash_at` returns the hash of the record already held at a sequence number.
pub(crate) fn check_offer<F>(
    head: Option<&ChainHead>,
    record: &LedgerRecord,
    hash_at: F,
) -> Result<Accepted>
where
    F: FnOnce(u64) -> Result<Option<Blake3Hash>>,
{
    let have = head.map_or(0, |h| h.seq);
    if record.seq == 0 {
        return Err(LinkError::InvalidSequence {
            expected: have + 1,
            got: 0,
        }
        .into());
    }
    if record.seq <= have {
        return match hash_at(record.seq)? {
            Some(hash) if hash == record.hash() => Ok(Accepted::AlreadyPresent),
            _ => Err(LedgerError::Conflict(record.seq)),
        };
    }
    if record.seq > have + 1 {
        return Err(LedgerError::Behind {
            have,
            offered: record.seq,
        });
    }
    validate_link(head, record)?;
    Ok(Accepted::Appended)
}

/// Map a chain validation failure found in persisted history.
pub(crate) fn tampered(e: LinkError) -> LedgerError {
    LedgerError::tampered(e.seq(), e.to_string())
}

/// Clamp a 1-based start position.
pub(crate) fn first_seq(from: u64) -> u64 {
    from.max(1)
}
