//! The Registry Ledger.
//!
//! [`RegistryLedger`] turns a [`LedgerLog`] into a document registry. State
//! is a [`RegistryIndex`] replayed from the log; writes are checked against
//! it, appended, and confirmed by replaying the appended record.
//!
//! # Ordering
//!
//! Writes on one CID are serialized by a per-CID async mutex, so a check and
//! the append it guards cannot interleave with another write on that CID.
//! Writes on different CIDs proceed concurrently and are ordered only by the
//! log. Reads take no per-CID lock.
//!
//! Before each check the index catches up with the log tail, so several
//! registries can share one log. Rules are re-applied on replay, so if two
//! registries race on the same CID the later record simply has no effect
//! and its writer is told so.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use docchain_core::{
    ChainHead, Cid, Deadline, Identity, LedgerRecord, Metadata, RecordBody, RegistryEntry,
};

use crate::error::{LedgerError, Result};
use crate::index::{RegistrationPolicy, RegistryIndex};
use crate::log::LedgerLog;

/// Registry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub registration: RegistrationPolicy,
    /// Upper bound on any single operation, in milliseconds, applied on top
    /// of the caller's deadline. `None` leaves only the caller's deadline.
    pub op_timeout_ms: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            registration: RegistrationPolicy::PerOwner,
            op_timeout_ms: Some(30_000),
        }
    }
}

impl LedgerConfig {
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }
}

/// An append-only document registry over a ledger log.
pub struct RegistryLedger {
    log: Arc<dyn LedgerLog>,
    config: LedgerConfig,
    index: RwLock<RegistryIndex>,
    cid_locks: Mutex<HashMap<Cid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RegistryLedger {
    /// Open a registry over `log`, replaying its history.
    pub async fn open(log: Arc<dyn LedgerLog>, config: LedgerConfig) -> Result<Self> {
        let registry = Self {
            log,
            config,
            index: RwLock::new(RegistryIndex::new(config.registration)),
            cid_locks: Mutex::new(HashMap::new()),
        };
        registry.catch_up().await?;
        {
            let index = registry.read_index()?;
            info!(
                log = %registry.log.name(),
                records = index.next_seq() - 1,
                documents = index.document_count(),
                "registry opened"
            );
        }
        Ok(registry)
    }

    pub fn log(&self) -> &Arc<dyn LedgerLog> {
        &self.log
    }

    /// The identity that attests ledger records.
    pub fn attestor(&self) -> Identity {
        self.log.attestor()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Register `cid` to `owner`.
    ///
    /// Fails with `AlreadyRegistered` if an active entry conflicts under the
    /// registration policy. The timestamp is assigned by the ledger.
    pub async fn register(
        &self,
        cid: Cid,
        owner: Identity,
        metadata: Metadata,
        deadline: Deadline,
    ) -> Result<RegistryEntry> {
        self.within(deadline, async {
            let _guard = self.lock_cid(&cid).await?;
            let record = self
                .append_checked(|index| {
                    if index.conflicting_registration(&cid, &owner).is_some() {
                        return Err(LedgerError::AlreadyRegistered { cid, owner });
                    }
                    Ok(RecordBody::Register {
                        cid,
                        owner,
                        metadata: metadata.clone(),
                    })
                })
                .await?;
            let entry = self
                .confirm(&record)
                .await?
                .ok_or(LedgerError::AlreadyRegistered { cid, owner })?;
            info!(%cid, %owner, seq = entry.seq, "document registered");
            Ok(entry)
        })
        .await
    }

    /// Revoke `caller`'s active registration of `cid`.
    ///
    /// Appends a revocation record and returns it as an entry; the original
    /// registration stays in history with status `Revoked`.
    pub async fn revoke(
        &self,
        cid: Cid,
        caller: Identity,
        deadline: Deadline,
    ) -> Result<RegistryEntry> {
        self.within(deadline, async {
            let _guard = self.lock_cid(&cid).await?;
            let record = self
                .append_checked(|index| {
                    if let Some(active) = index.active_entry_of(&cid, &caller) {
                        return Ok(RecordBody::Revoke {
                            cid,
                            owner: caller,
                            target_seq: active.seq,
                        });
                    }
                    if index.lookup(&cid).is_some() {
                        return Err(LedgerError::NotOwner { cid, caller });
                    }
                    if index.registrations_of(&cid, &caller).next().is_some() {
                        return Err(LedgerError::AlreadyRevoked(cid));
                    }
                    if index.history(&cid).is_empty() {
                        return Err(LedgerError::NotFound(cid));
                    }
                    Err(LedgerError::NotOwner { cid, caller })
                })
                .await?;
            let entry = self
                .confirm(&record)
                .await?
                .ok_or(LedgerError::AlreadyRevoked(cid))?;
            info!(%cid, owner = %caller, seq = entry.seq, revokes = ?entry.revokes, "registration revoked");
            Ok(entry)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// The most recent active entry for `cid`.
    pub async fn lookup(&self, cid: &Cid, deadline: Deadline) -> Result<RegistryEntry> {
        self.read(deadline, |index| {
            index.lookup(cid).cloned().ok_or(LedgerError::NotFound(*cid))
        })
        .await
    }

    /// Every entry for `cid`, oldest first. Empty if it was never registered.
    pub async fn history(&self, cid: &Cid, deadline: Deadline) -> Result<Vec<RegistryEntry>> {
        self.read(deadline, |index| Ok(index.history(cid))).await
    }

    /// Metadata of the most recent active entry for `cid`.
    pub async fn metadata(&self, cid: &Cid, deadline: Deadline) -> Result<Metadata> {
        Ok(self.lookup(cid, deadline).await?.metadata)
    }

    /// Latest registration of each document `owner` registered, active or revoked.
    pub async fn documents_of(
        &self,
        owner: &Identity,
        deadline: Deadline,
    ) -> Result<Vec<RegistryEntry>> {
        self.read(deadline, |index| Ok(index.documents_of(owner))).await
    }

    /// All active registrations of `cid`, oldest first.
    pub async fn active_entries(
        &self,
        cid: &Cid,
        deadline: Deadline,
    ) -> Result<Vec<RegistryEntry>> {
        self.read(deadline, |index| Ok(index.active_entries(cid).cloned().collect()))
            .await
    }

    /// `owner`'s active registration of `cid`, if any.
    pub async fn active_entry_of(
        &self,
        cid: &Cid,
        owner: &Identity,
        deadline: Deadline,
    ) -> Result<Option<RegistryEntry>> {
        self.read(deadline, |index| Ok(index.active_entry_of(cid, owner).cloned()))
            .await
    }

    /// The raw ledger record at `seq`.
    pub async fn record(&self, seq: u64, deadline: Deadline) -> Result<LedgerRecord> {
        self.within(deadline, self.log.record(seq)).await
    }

    pub async fn head(&self, deadline: Deadline) -> Result<Option<ChainHead>> {
        self.within(deadline, self.log.head()).await
    }

    /// Re-validate the whole chain. Returns `Tampered` at the first bad record.
    pub async fn verify_chain(&self, deadline: Deadline) -> Result<Option<ChainHead>> {
        self.within(deadline, self.log.verify_chain()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn read<T, F>(&self, deadline: Deadline, f: F) -> Result<T>
    where
        F: FnOnce(&RegistryIndex) -> Result<T>,
    {
        self.within(deadline, async {
            self.catch_up().await?;
            let index = self.read_index()?;
            f(&index)
        })
        .await
    }

    /// Check against fresh state, then append what the check produced.
    ///
    /// If the log reports that an earlier unconfirmed append has landed, the
    /// check runs again on the new state before a single retry.
    async fn append_checked<F>(&self, check: F) -> Result<LedgerRecord>
    where
        F: Fn(&RegistryIndex) -> Result<RecordBody>,
    {
        self.catch_up().await?;
        let body = check(&*self.read_index()?)?;
        match self.log.append(body).await {
            Err(LedgerError::Reconciled { seq }) => {
                info!(seq, "earlier append committed late; re-checking");
                self.catch_up().await?;
                let body = check(&*self.read_index()?)?;
                self.log.append(body).await
            }
            other => other,
        }
    }

    /// Replay up to and including `record`, returning the entry it produced.
    async fn confirm(&self, record: &LedgerRecord) -> Result<Option<RegistryEntry>> {
        self.catch_up().await?;
        let index = self.read_index()?;
        if index.next_seq() <= record.seq {
            return Err(LedgerError::Unavailable(format!(
                "seq {} was appended but is not readable yet",
                record.seq
            )));
        }
        Ok(index.entry(record.seq).cloned())
    }

    /// Apply records appended since the last replay.
    async fn catch_up(&self) -> Result<()> {
        let from = self.read_index()?.next_seq();
        let records = self.log.read_from(from).await?;
        if records.is_empty() {
            return Ok(());
        }
        let mut index = self.write_index()?;
        let mut applied = 0usize;
        for record in &records {
            // A concurrent catch-up may have got here first.
            if record.seq < index.next_seq() {
                continue;
            }
            index.apply(record)?;
            applied += 1;
        }
        debug!(from, applied, "registry caught up");
        Ok(())
    }

    async fn lock_cid(&self, cid: &Cid) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .cid_locks
                .lock()
                .map_err(|_| LedgerError::poisoned("cid locks"))?;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(*cid).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    async fn within<T, F>(&self, deadline: Deadline, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = match self.config.op_timeout() {
            Some(limit) => deadline.min_with(limit),
            None => deadline,
        };
        if deadline.is_expired() {
            return Err(LedgerError::Timeout);
        }
        match deadline.instant() {
            Some(at) => tokio::time::timeout_at(tokio::time::Instant::from_std(at), operation)
                .await
                .map_err(|_| LedgerError::Timeout)?,
            None => operation.await,
        }
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, RegistryIndex>> {
        self.index.read().map_err(|_| LedgerError::poisoned("registry index"))
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, RegistryIndex>> {
        self.index.write().map_err(|_| LedgerError::poisoned("registry index"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileLogOptions, LocalFileLog};
    use crate::log::{Attestor, Replica};
    use crate::memory::MemoryLog;
    use crate::quorum::{DistributedConsensusLog, QuorumConfig};
    use docchain_core::{Codec, EntryStatus, Keypair, ManualClock};

    fn attestor() -> Attestor {
        Attestor::new(Keypair::from_seed(&[0xaa; 32]), Arc::new(ManualClock::new(1_000)))
    }

    fn memory_log() -> Arc<dyn LedgerLog> {
        Arc::new(MemoryLog::new(attestor()))
    }

    async fn registry(log: Arc<dyn LedgerLog>) -> RegistryLedger {
        RegistryLedger::open(log, LedgerConfig::default()).await.unwrap()
    }

    fn identity(seed: u8) -> Identity {
        Keypair::from_seed(&[seed; 32]).identity()
    }

    fn cid(data: &[u8]) -> Cid {
        Cid::of(Codec::Raw, data)
    }

    fn now() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_register_lookup() {
        let registry = registry(memory_log()).await;
        let c = cid(b"income.pdf");
        let owner = identity(1);

        let entry = registry
            .register(c, owner, Metadata::new("Income Certificate"), now())
            .await
            .unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(entry.timestamp, 1_000);
        assert!(entry.is_active());

        assert_eq!(registry.lookup(&c, now()).await.unwrap(), entry);
        assert_eq!(
            registry.metadata(&c, now()).await.unwrap().title,
            "Income Certificate"
        );
        assert!(matches!(
            registry.lookup(&cid(b"other"), now()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let registry = registry(memory_log()).await;
        let c = cid(b"doc");
        registry
            .register(c, identity(1), Metadata::new("doc"), now())
            .await
            .unwrap();
        let err = registry
            .register(c, identity(1), Metadata::new("doc"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyRegistered { .. }));
        assert!(!err.is_retryable());

        // Another owner may register the same content under the default policy.
        registry
            .register(c, identity(2), Metadata::new("copy"), now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exclusive_policy() {
        let config = LedgerConfig {
            registration: RegistrationPolicy::ExclusiveCid,
            ..LedgerConfig::default()
        };
        let registry = RegistryLedger::open(memory_log(), config).await.unwrap();
        let c = cid(b"doc");
        registry
            .register(c, identity(1), Metadata::new("doc"), now())
            .await
            .unwrap();
        assert!(matches!(
            registry
                .register(c, identity(2), Metadata::new("doc"), now())
                .await,
            Err(LedgerError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_revoke_after_handover_is_not_owner() {
        let config = LedgerConfig {
            registration: RegistrationPolicy::ExclusiveCid,
            ..LedgerConfig::default()
        };
        let registry = RegistryLedger::open(memory_log(), config).await.unwrap();
        let c = cid(b"deed");
        let (first, second) = (identity(1), identity(2));

        registry
            .register(c, first, Metadata::new("deed"), now())
            .await
            .unwrap();
        registry.revoke(c, first, now()).await.unwrap();
        registry
            .register(c, second, Metadata::new("deed"), now())
            .await
            .unwrap();

        assert!(matches!(
            registry.revoke(c, first, now()).await,
            Err(LedgerError::NotOwner { caller, .. }) if caller == first
        ));
        assert_eq!(registry.lookup(&c, now()).await.unwrap().owner, second);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_register() {
        let registry = Arc::new(registry(memory_log()).await);
        let c = cid(b"race");
        let owner = identity(1);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register(c, owner, Metadata::new("race"), Deadline::none())
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::AlreadyRegistered { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(rejected, 7);
        assert_eq!(registry.history(&c, now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke() {
        let registry = registry(memory_log()).await;
        let c = cid(b"doc");
        let owner = identity(1);
        let registered = registry
            .register(c, owner, Metadata::new("doc"), now())
            .await
            .unwrap();

        assert!(matches!(
            registry.revoke(c, identity(2), now()).await,
            Err(LedgerError::NotOwner { .. })
        ));

        let revocation = registry.revoke(c, owner, now()).await.unwrap();
        assert_eq!(revocation.revokes, Some(registered.seq));
        assert_eq!(revocation.status, EntryStatus::Revoked);

        assert!(matches!(
            registry.lookup(&c, now()).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            registry.revoke(c, owner, now()).await,
            Err(LedgerError::AlreadyRevoked(_))
        ));

        let history = registry.history(&c, now()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seq, registered.seq);
        assert_eq!(history[0].status, EntryStatus::Revoked);
        assert_eq!(history[1], revocation);

        // Re-registration after revocation starts a new active entry.
        let again = registry
            .register(c, owner, Metadata::new("doc v2"), now())
            .await
            .unwrap();
        assert_eq!(registry.lookup(&c, now()).await.unwrap(), again);
    }

    #[tokio::test]
    async fn test_revoke_unknown() {
        let registry = registry(memory_log()).await;
        assert!(matches!(
            registry.revoke(cid(b"nothing"), identity(1), now()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_documents_of() {
        let registry = registry(memory_log()).await;
        let alice = identity(1);
        for name in [b"a".as_slice(), b"b", b"c"] {
            registry
                .register(cid(name), alice, Metadata::new("doc"), now())
                .await
                .unwrap();
        }
        registry
            .register(cid(b"z"), identity(2), Metadata::new("doc"), now())
            .await
            .unwrap();
        registry.revoke(cid(b"b"), alice, now()).await.unwrap();

        let docs = registry.documents_of(&alice, now()).await.unwrap();
        assert_eq!(
            docs.iter().map(|e| e.cid).collect::<Vec<_>>(),
            vec![cid(b"a"), cid(b"b"), cid(b"c")]
        );
        assert_eq!(docs[1].status, EntryStatus::Revoked);
    }

    #[tokio::test]
    async fn test_deadline_expiry() {
        let log: Arc<dyn LedgerLog> =
            Arc::new(MemoryLog::new(attestor()).with_latency(Duration::from_millis(200)));
        let registry = RegistryLedger::open(log, LedgerConfig::default()).await.unwrap();

        let err = registry
            .register(
                cid(b"slow"),
                identity(1),
                Metadata::new("slow"),
                Deadline::after(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Timeout));
        assert!(err.is_retryable());

        let expired = Deadline::after(Duration::ZERO);
        assert!(matches!(
            registry.lookup(&cid(b"slow"), expired).await,
            Err(LedgerError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_shared_log() {
        let log = memory_log();
        let first = registry(log.clone()).await;
        let second = registry(log).await;
        let c = cid(b"shared");

        first
            .register(c, identity(1), Metadata::new("doc"), now())
            .await
            .unwrap();
        assert_eq!(second.lookup(&c, now()).await.unwrap().owner, identity(1));
        assert!(matches!(
            second
                .register(c, identity(1), Metadata::new("doc"), now())
                .await,
            Err(LedgerError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_reopen_file_log_replays_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.log");
        let c = cid(b"persisted");
        {
            let log = LocalFileLog::open(&path, attestor(), FileLogOptions::default())
                .await
                .unwrap();
            let registry = registry(Arc::new(log)).await;
            registry
                .register(c, identity(1), Metadata::new("doc"), now())
                .await
                .unwrap();
            registry.revoke(c, identity(1), now()).await.unwrap();
        }
        let log = LocalFileLog::open(&path, attestor(), FileLogOptions::default())
            .await
            .unwrap();
        let registry = registry(Arc::new(log)).await;
        assert_eq!(registry.history(&c, now()).await.unwrap().len(), 2);
        assert!(registry.lookup(&c, now()).await.is_err());
        assert_eq!(registry.verify_chain(now()).await.unwrap().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_late_commit_is_reconciled() {
        let nodes: Vec<Arc<MemoryLog>> = (0..3)
            .map(|i| Arc::new(MemoryLog::named(format!("node-{i}"), attestor())))
            .collect();
        let members: Vec<Arc<dyn Replica>> =
            nodes.iter().map(|n| n.clone() as Arc<dyn Replica>).collect();
        let log = DistributedConsensusLog::open(
            members,
            attestor(),
            QuorumConfig {
                quorum: None,
                replica_timeout_ms: 100,
            },
        )
        .await
        .unwrap();
        let registry = registry(Arc::new(log)).await;
        let c = cid(b"doc");
        let owner = identity(1);

        nodes[1].set_offline(true);
        nodes[2].set_offline(true);
        let err = registry
            .register(c, owner, Metadata::new("doc"), now())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // The retry lands the earlier record, which already registers the document.
        nodes[1].set_offline(false);
        assert!(matches!(
            registry.register(c, owner, Metadata::new("doc"), now()).await,
            Err(LedgerError::AlreadyRegistered { .. })
        ));
        assert_eq!(registry.lookup(&c, now()).await.unwrap().seq, 1);

        // An unrelated write after reconciliation goes through untouched.
        let other = registry
            .register(cid(b"other"), owner, Metadata::new("other"), now())
            .await
            .unwrap();
        assert_eq!(other.seq, 2);
    }
}
