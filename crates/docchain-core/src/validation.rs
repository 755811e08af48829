//! Chain validation: linkage, ordering and attestation checks.

use crate::error::LinkError;
use crate::record::{ChainHead, LedgerRecord};

/// Validate that `record` correctly extends the chain ending at `head`.
///
/// This checks:
/// - Sequence continuity (`head.seq + 1`, or 1 for the first record)
/// - `prev_hash` links to the head (or is zero for the first record)
/// - Timestamp does not go backwards
/// - The attestation signature
pub fn validate_link(head: Option<&ChainHead>, record: &LedgerRecord) -> Result<(), LinkError> {
    let (expected_seq, expected_prev, min_timestamp) = match head {
        Some(h) => (h.seq + 1, h.hash, Some(h.timestamp)),
        None => (1, crate::crypto::Blake3Hash::ZERO, None),
    };

    if record.seq != expected_seq {
        return Err(LinkError::InvalidSequence {
            expected: expected_seq,
            got: record.seq,
        });
    }

    if record.prev_hash != expected_prev {
        return Err(LinkError::BrokenLink { seq: record.seq });
    }

    if let Some(previous) = min_timestamp {
        if record.timestamp < previous {
            return Err(LinkError::TimestampRegressed {
                seq: record.seq,
                timestamp: record.timestamp,
                previous,
            });
        }
    }

    record
        .verify_attestation()
        .map_err(|_| LinkError::BadAttestation { seq: record.seq })
}

/// Validate a whole chain from genesis, returning its head.
pub fn validate_chain<'a, I>(records: I) -> Result<Option<ChainHead>, LinkError>
where
    I: IntoIterator<Item = &'a LedgerRecord>,
{
    let mut head: Option<ChainHead> = None;
    for record in records {
        validate_link(head.as_ref(), record)?;
        head = Some(record.head());
    }
    Ok(head)
}
