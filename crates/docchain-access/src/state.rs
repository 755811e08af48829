//! Permission state computation.
//!
//! Permission state is computed by replaying `Grant` and `Ungrant` records
//! from the access journal. A later grant for the same (CID, grantor,
//! grantee) replaces the earlier one; an ungrant marks it revoked. Records
//! of other kinds are skipped, so the journal may be shared with the
//! registry.

use std::collections::HashMap;

use docchain_core::{Cid, EntryStatus, Identity, LedgerRecord, RecordBody, ShareGrant};
use docchain_ledger::LedgerError;

use crate::error::Result;

/// Identifies a grant: (CID, grantor, grantee).
pub type GrantKey = (Cid, Identity, Identity);

/// Aggregated permission state.
#[derive(Debug, Default)]
pub struct PermissionState {
    /// Highest journal sequence number replayed.
    applied: u64,

    /// Current grant for each key.
    grants: HashMap<GrantKey, ShareGrant>,

    /// Index: CID -> keys, first grant order.
    by_cid: HashMap<Cid, Vec<GrantKey>>,

    /// Index: grantee -> keys, first grant order.
    by_grantee: HashMap<Identity, Vec<GrantKey>>,
}

impl PermissionState {
    /// Create a new empty permission state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the next journal record to replay.
    pub fn next_seq(&self) -> u64 {
        self.applied + 1
    }

    /// Replay one journal record. Records must arrive in sequence order.
    pub fn apply(&mut self, record: &LedgerRecord) -> Result<()> {
        if record.seq != self.next_seq() {
            return Err(LedgerError::Tampered {
                seq: record.seq,
                reason: format!("journal replay expected seq {}", self.next_seq()),
            }
            .into());
        }
        self.applied = record.seq;

        match &record.body {
            RecordBody::Grant {
                cid,
                grantor,
                grantee,
                expires_at,
            } => self.apply_grant(ShareGrant {
                cid: *cid,
                grantor: *grantor,
                grantee: *grantee,
                timestamp: record.timestamp,
                expires_at: *expires_at,
                status: EntryStatus::Active,
            }),
            RecordBody::Ungrant {
                cid,
                grantor,
                grantee,
            } => self.apply_ungrant(&(*cid, *grantor, *grantee)),
            // Registry records, not permission records
            RecordBody::Register { .. } | RecordBody::Revoke { .. } => {}
        }
        Ok(())
    }

    /// Record a grant, replacing any earlier grant with the same key.
    pub fn apply_grant(&mut self, grant: ShareGrant) {
        let key = (grant.cid, grant.grantor, grant.grantee);
        if self.grants.insert(key, grant).is_none() {
            self.by_cid.entry(key.0).or_default().push(key);
            self.by_grantee.entry(key.2).or_default().push(key);
        }
    }

    /// Mark a grant revoked. Unknown keys are ignored.
    pub fn apply_ungrant(&mut self, key: &GrantKey) {
        if let Some(grant) = self.grants.get_mut(key) {
            grant.status = EntryStatus::Revoked;
        }
    }

    /// Get the current grant for a key.
    pub fn get_grant(&self, key: &GrantKey) -> Option<&ShareGrant> {
        self.grants.get(key)
    }

    /// All grants ever made on `cid`, with their current status.
    pub fn grants_for(&self, cid: &Cid) -> Vec<&ShareGrant> {
        self.by_cid
            .get(cid)
            .map(|keys| keys.iter().filter_map(|k| self.grants.get(k)).collect())
            .unwrap_or_default()
    }

    /// All grants ever made to `grantee`, with their current status.
    pub fn grants_to(&self, grantee: &Identity) -> Vec<&ShareGrant> {
        self.by_grantee
            .get(grantee)
            .map(|keys| keys.iter().filter_map(|k| self.grants.get(k)).collect())
            .unwrap_or_default()
    }

    /// Grants on `cid` held by `grantee` that are live at `now`.
    pub fn live_grants(&self, cid: &Cid, grantee: &Identity, now: i64) -> Vec<&ShareGrant> {
        self.grants_for(cid)
            .into_iter()
            .filter(|g| g.grantee == *grantee && g.is_live(now))
            .collect()
    }
}
