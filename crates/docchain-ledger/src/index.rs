//! Registry state derived from the log.
//!
//! The index is computed by replaying `Register` and `Revoke` records in
//! sequence order. Registration rules are applied during replay, so every
//! reader of the same log derives the same state: a record that violates
//! them (a duplicate registration that lost a race, a revocation of an
//! entry that is no longer active) stays in the log but has no effect.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use docchain_core::{Cid, EntryStatus, Identity, LedgerRecord, RecordBody, RegistryEntry};

use crate::error::{LedgerError, Result};

/// Who may hold an active registration for a CID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// One active entry per (CID, owner). Different owners may register the
    /// same content independently.
    #[default]
    PerOwner,
    /// One active entry per CID. The first registrant owns it until revoked.
    ExclusiveCid,
}

/// Replayed registry state.
#[derive(Debug, Default)]
pub struct RegistryIndex {
    policy: RegistrationPolicy,
    /// Highest sequence number replayed.
    applied: u64,
    /// Effective entries, registrations and revocations, by seq.
    entries: BTreeMap<u64, RegistryEntry>,
    /// Index: CID -> effective entry seqs, append order.
    by_cid: HashMap<Cid, Vec<u64>>,
    /// Index: owner -> CIDs they registered, first registration order.
    by_owner: HashMap<Identity, Vec<Cid>>,
}

impl RegistryIndex {
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Sequence number of the next record to replay.
    pub fn next_seq(&self) -> u64 {
        self.applied + 1
    }

    /// Replay one record. Records must arrive in sequence order.
    ///
    /// Returns the entry the record produced, or `None` if it had no effect.
    pub fn apply(&mut self, record: &LedgerRecord) -> Result<Option<RegistryEntry>> {
        if record.seq != self.next_seq() {
            return Err(LedgerError::tampered(
                record.seq,
                format!("replay expected seq {}", self.next_seq()),
            ));
        }
        self.applied = record.seq;

        let entry = match &record.body {
            RecordBody::Register {
                cid,
                owner,
                metadata,
            } => {
                if let Some(existing) = self.conflicting_registration(cid, owner) {
                    warn!(seq = record.seq, %cid, existing, "duplicate registration ignored");
                    return Ok(None);
                }
                RegistryEntry {
                    seq: record.seq,
                    cid: *cid,
                    owner: *owner,
                    timestamp: record.timestamp,
                    metadata: metadata.clone(),
                    status: EntryStatus::Active,
                    revokes: None,
                }
            }
            RecordBody::Revoke {
                cid,
                owner,
                target_seq,
            } => {
                let Some(target) = self.entries.get_mut(target_seq).filter(|t| {
                    t.revokes.is_none() && t.cid == *cid && t.owner == *owner && t.is_active()
                }) else {
                    warn!(seq = record.seq, %cid, target_seq, "revocation without active target ignored");
                    return Ok(None);
                };
                target.status = EntryStatus::Revoked;
                RegistryEntry {
                    seq: record.seq,
                    cid: *cid,
                    owner: *owner,
                    timestamp: record.timestamp,
                    metadata: target.metadata.clone(),
                    status: EntryStatus::Revoked,
                    revokes: Some(*target_seq),
                }
            }
            RecordBody::Grant { .. } | RecordBody::Ungrant { .. } => return Ok(None),
        };

        self.by_cid.entry(entry.cid).or_default().push(entry.seq);
        if entry.revokes.is_none() {
            let cids = self.by_owner.entry(entry.owner).or_default();
            if !cids.contains(&entry.cid) {
                cids.push(entry.cid);
            }
        }
        self.entries.insert(entry.seq, entry.clone());
        Ok(Some(entry))
    }

    /// The seq of an active registration that `owner` registering `cid` would violate.
    pub fn conflicting_registration(&self, cid: &Cid, owner: &Identity) -> Option<u64> {
        self.active_entries(cid)
            .find(|e| match self.policy {
                RegistrationPolicy::PerOwner => e.owner == *owner,
                RegistrationPolicy::ExclusiveCid => true,
            })
            .map(|e| e.seq)
    }

    /// Every entry for `cid`, oldest first, including revocations.
    pub fn history(&self, cid: &Cid) -> Vec<RegistryEntry> {
        self.entries_for(cid).cloned().collect()
    }

    /// Active registrations for `cid`, oldest first.
    pub fn active_entries<'a>(&'a self, cid: &Cid) -> impl Iterator<Item = &'a RegistryEntry> + 'a {
        self.entries_for(cid).filter(|e| e.is_active())
    }

    /// The most recent active registration for `cid`.
    pub fn lookup(&self, cid: &Cid) -> Option<&RegistryEntry> {
        self.active_entries(cid).last()
    }

    /// The active registration of `cid` by `owner`, if any.
    pub fn active_entry_of(&self, cid: &Cid, owner: &Identity) -> Option<&RegistryEntry> {
        self.active_entries(cid).filter(|e| e.owner == *owner).last()
    }

    /// Registrations of `cid` by `owner`, active or not, oldest first.
    pub fn registrations_of<'a>(
        &'a self,
        cid: &Cid,
        owner: &'a Identity,
    ) -> impl Iterator<Item = &'a RegistryEntry> + 'a {
        self.entries_for(cid)
            .filter(move |e| e.revokes.is_none() && e.owner == *owner)
    }

    /// The latest registration of each CID `owner` registered, in order of
    /// first registration.
    pub fn documents_of(&self, owner: &Identity) -> Vec<RegistryEntry> {
        self.by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|cid| self.registrations_of(cid, owner).last().cloned())
            .collect()
    }

    /// The effective entry at `seq`.
    pub fn entry(&self, seq: u64) -> Option<&RegistryEntry> {
        self.entries.get(&seq)
    }

    /// Number of distinct CIDs with at least one entry.
    pub fn document_count(&self) -> usize {
        self.by_cid.len()
    }

    fn entries_for<'a>(&'a self, cid: &Cid) -> impl Iterator<Item = &'a RegistryEntry> + 'a {
        self.by_cid
            .get(cid)
            .into_iter()
            .flatten()
            .filter_map(|seq| self.entries.get(seq))
    }
}
