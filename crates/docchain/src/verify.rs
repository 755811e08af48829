//! The Verification Service.
//!
//! Answers "is this document registered, and by whom?" either from a CID or
//! from the file itself. A negative answer is a [`VerificationResult`] with
//! `verified = false`; only infrastructure failures are errors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use docchain_core::{
    compute_cid, Blake3Hash, ChainHead, ChunkingConfig, Cid, Deadline, Identity, LedgerRecord,
    LinkError, RegistryEntry, Signature,
};
use docchain_ledger::{LedgerError, RegistryLedger};

use crate::error::Result;

/// Evidence that a registry entry is part of the attested chain.
///
/// Everything needed to check the matched record offline, given the
/// ledger operator's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// The ledger record the entry was derived from.
    pub record: LedgerRecord,
    pub record_hash: Blake3Hash,
    /// The operator key the ledger is run under.
    pub ledger_key: Identity,
    pub signature: Signature,
    /// Chain head at the time of verification.
    pub head: ChainHead,
}

impl Proof {
    /// Check the proof's internal consistency and the operator's signature.
    pub fn check(&self) -> std::result::Result<(), LinkError> {
        let seq = self.record.seq;
        if self.record.hash() != self.record_hash {
            return Err(LinkError::HashMismatch { seq });
        }
        if self.record.attestor != self.ledger_key || self.record.signature != self.signature {
            return Err(LinkError::BadAttestation { seq });
        }
        self.ledger_key
            .verify(self.record_hash.as_bytes(), &self.signature)
            .map_err(|_| LinkError::BadAttestation { seq })?;
        if self.head.seq < seq {
            return Err(LinkError::InvalidSequence {
                expected: seq,
                got: self.head.seq,
            });
        }
        Ok(())
    }
}

/// Outcome of a verification query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    /// The active entry that matched, if any.
    pub matched_entry: Option<RegistryEntry>,
    /// CID recomputed from supplied bytes. `None` for CID-only queries.
    pub recomputed_cid: Option<Cid>,
    /// CID the caller supplied or claimed. `None` for file-only queries.
    pub supplied_cid: Option<Cid>,
    /// Attestation evidence for `matched_entry`.
    pub proof: Option<Proof>,
}

impl VerificationResult {
    fn negative(recomputed_cid: Option<Cid>, supplied_cid: Option<Cid>) -> Self {
        Self {
            verified: false,
            matched_entry: None,
            recomputed_cid,
            supplied_cid,
            proof: None,
        }
    }

    /// Owner of the matched entry.
    pub fn owner(&self) -> Option<Identity> {
        self.matched_entry.as_ref().map(|e| e.owner)
    }
}

/// Verifies documents against the registry.
pub struct VerificationService {
    registry: Arc<RegistryLedger>,
    chunking: ChunkingConfig,
}

impl VerificationService {
    /// `chunking` must match the configuration documents were stored with,
    /// or recomputed CIDs of large files will not match.
    pub fn new(registry: Arc<RegistryLedger>, chunking: ChunkingConfig) -> Self {
        Self { registry, chunking }
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    /// Verify a CID: true if it has an active registry entry.
    pub async fn verify_by_cid(&self, cid: &Cid, deadline: Deadline) -> Result<VerificationResult> {
        let (entry, proof) = match self.matched(cid, deadline).await? {
            Some(found) => found,
            None => {
                debug!(%cid, "no active entry");
                return Ok(VerificationResult::negative(None, Some(*cid)));
            }
        };
        debug!(%cid, owner = %entry.owner, seq = entry.seq, "verified by cid");
        Ok(VerificationResult {
            verified: true,
            matched_entry: Some(entry),
            recomputed_cid: None,
            supplied_cid: Some(*cid),
            proof: Some(proof),
        })
    }

    /// Verify a file: recompute its CID and look that up.
    ///
    /// Any change to the bytes yields a different CID and so a negative result.
    pub async fn verify_by_file(&self, bytes: &[u8], deadline: Deadline) -> Result<VerificationResult> {
        let recomputed = compute_cid(bytes, &self.chunking)?;
        let mut result = self.verify_by_cid(&recomputed, deadline).await?;
        result.recomputed_cid = Some(recomputed);
        result.supplied_cid = None;
        Ok(result)
    }

    /// Verify a file against the CID it claims to be.
    ///
    /// Verified only when the recomputed CID equals `claimed` and `claimed`
    /// has an active entry.
    pub async fn verify_file_against(
        &self,
        bytes: &[u8],
        claimed: &Cid,
        deadline: Deadline,
    ) -> Result<VerificationResult> {
        let recomputed = compute_cid(bytes, &self.chunking)?;
        let matched = self.matched(claimed, deadline).await?;
        if recomputed != *claimed {
            debug!(%claimed, %recomputed, "file does not match claimed cid");
        }
        let verified = recomputed == *claimed && matched.is_some();
        let (matched_entry, proof) = match matched {
            Some((entry, proof)) => (Some(entry), Some(proof)),
            None => (None, None),
        };
        Ok(VerificationResult {
            verified,
            matched_entry,
            recomputed_cid: Some(recomputed),
            supplied_cid: Some(*claimed),
            proof,
        })
    }

    /// The active entry for `cid` with its proof, or `None` if there is none.
    async fn matched(&self, cid: &Cid, deadline: Deadline) -> Result<Option<(RegistryEntry, Proof)>> {
        let entry = match self.registry.lookup(cid, deadline).await {
            Ok(entry) => entry,
            Err(LedgerError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let proof = self.prove(&entry, deadline).await?;
        Ok(Some((entry, proof)))
    }

    async fn prove(&self, entry: &RegistryEntry, deadline: Deadline) -> Result<Proof> {
        let record = self.registry.record(entry.seq, deadline).await?;
        if record.body.cid() != &entry.cid {
            return Err(LedgerError::Tampered {
                seq: entry.seq,
                reason: "record does not match the indexed entry".into(),
            }
            .into());
        }
        let head = self
            .registry
            .head(deadline)
            .await?
            .filter(|h| h.seq >= record.seq)
            .ok_or_else(|| LedgerError::Tampered {
                seq: entry.seq,
                reason: "chain head is behind the indexed entry".into(),
            })?;
        Ok(Proof {
            record_hash: record.hash(),
            ledger_key: self.registry.attestor(),
            signature: record.signature,
            record,
            head,
        })
    }
}
