//! The Access Control Overlay.
//!
//! Read capabilities on documents, layered over the registry. Grants are
//! records in an access journal and never touch registry entries, so
//! sharing and unsharing cannot affect a document's authenticity.
//!
//! Access is re-derived on every check: a grant only counts while its
//! grantor still holds an active registration of the CID, so revoking a
//! document silently disables every grant made on it.

use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use tracing::{debug, info};

use docchain_core::{Cid, Clock, Deadline, EntryStatus, Identity, RecordBody, ShareGrant};
use docchain_ledger::{LedgerLog, RegistryLedger};

use crate::error::{AccessError, Result};
use crate::state::PermissionState;

/// Grants, grant revocation and access checks for registered documents.
pub struct AccessControl {
    registry: Arc<RegistryLedger>,
    journal: Arc<dyn LedgerLog>,
    clock: Arc<dyn Clock>,
    state: RwLock<PermissionState>,
}

impl AccessControl {
    /// Open the overlay, replaying `journal` into permission state.
    ///
    /// `clock` decides grant expiry.
    pub async fn open(
        registry: Arc<RegistryLedger>,
        journal: Arc<dyn LedgerLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let overlay = Self {
            registry,
            journal,
            clock,
            state: RwLock::new(PermissionState::new()),
        };
        overlay.catch_up().await?;
        info!(journal = %overlay.journal.name(), "access overlay opened");
        Ok(overlay)
    }

    pub fn registry(&self) -> &Arc<RegistryLedger> {
        &self.registry
    }

    pub fn journal(&self) -> &Arc<dyn LedgerLog> {
        &self.journal
    }

    /// Grant `grantee` read access to `cid`.
    ///
    /// The grantor must hold an active registration of `cid`. Granting again
    /// replaces the earlier grant, including its expiry.
    pub async fn grant(
        &self,
        cid: Cid,
        grantor: Identity,
        grantee: Identity,
        expires_at: Option<i64>,
        deadline: Deadline,
    ) -> Result<ShareGrant> {
        self.within(deadline, async {
            if grantor == grantee {
                return Err(AccessError::InvalidGrant(
                    "cannot share a document with oneself".into(),
                ));
            }
            if let Some(expiry) = expires_at {
                let now = self.clock.now_millis();
                if now > expiry {
                    return Err(AccessError::InvalidGrant(format!(
                        "expiry {expiry} is already past (now {now})"
                    )));
                }
            }
            if self
                .registry
                .active_entry_of(&cid, &grantor, deadline)
                .await?
                .is_none()
            {
                return Err(AccessError::NotOwner {
                    cid,
                    caller: grantor,
                });
            }

            let record = self
                .journal
                .append(RecordBody::Grant {
                    cid,
                    grantor,
                    grantee,
                    expires_at,
                })
                .await?;
            self.catch_up().await?;
            info!(%cid, %grantor, %grantee, ?expires_at, seq = record.seq, "access granted");
            Ok(ShareGrant {
                cid,
                grantor,
                grantee,
                timestamp: record.timestamp,
                expires_at,
                status: EntryStatus::Active,
            })
        })
        .await
    }

    /// Revoke `grantor`'s grant on `cid` to `grantee`.
    ///
    /// Idempotent: revoking a grant that is absent, revoked or expired
    /// appends nothing and succeeds.
    pub async fn revoke_grant(
        &self,
        cid: Cid,
        grantor: Identity,
        grantee: Identity,
        deadline: Deadline,
    ) -> Result<()> {
        self.within(deadline, async {
            self.catch_up().await?;
            let now = self.clock.now_millis();
            let live = self
                .read_state()?
                .get_grant(&(cid, grantor, grantee))
                .is_some_and(|g| g.is_live(now));
            if !live {
                debug!(%cid, %grantor, %grantee, "no live grant to revoke");
                return Ok(());
            }
            let record = self
                .journal
                .append(RecordBody::Ungrant {
                    cid,
                    grantor,
                    grantee,
                })
                .await?;
            self.catch_up().await?;
            info!(%cid, %grantor, %grantee, seq = record.seq, "access revoked");
            Ok(())
        })
        .await
    }

    /// Whether `identity` may read `cid`.
    ///
    /// True for the owner of an active registration, for anyone if an active
    /// registration is public, and for the holder of a live grant from an
    /// active owner. Once every registration is revoked only the former
    /// owners keep access.
    pub async fn can_access(
        &self,
        cid: &Cid,
        identity: &Identity,
        deadline: Deadline,
    ) -> Result<bool> {
        self.within(deadline, async {
            let active = self.registry.active_entries(cid, deadline).await?;
            let allowed = if active.is_empty() {
                self.registry
                    .history(cid, deadline)
                    .await?
                    .iter()
                    .any(|e| e.revokes.is_none() && e.owner == *identity)
            } else if active
                .iter()
                .any(|e| e.owner == *identity || e.metadata.is_public())
            {
                true
            } else {
                self.catch_up().await?;
                let now = self.clock.now_millis();
                let state = self.read_state()?;
                let granted = state
                    .live_grants(cid, identity, now)
                    .iter()
                    .any(|g| active.iter().any(|e| e.owner == g.grantor));
                granted
            };
            debug!(%cid, %identity, allowed, "access checked");
            Ok(allowed)
        })
        .await
    }

    /// Every grant made on `cid`, with its current status.
    pub async fn grants_for(&self, cid: &Cid, deadline: Deadline) -> Result<Vec<ShareGrant>> {
        self.within(deadline, async {
            self.catch_up().await?;
            let state = self.read_state()?;
            let grants = state.grants_for(cid).into_iter().cloned().collect();
            Ok(grants)
        })
        .await
    }

    /// Live grants held by `identity` whose grantor still owns the document.
    pub async fn shared_with(
        &self,
        identity: &Identity,
        deadline: Deadline,
    ) -> Result<Vec<ShareGrant>> {
        self.within(deadline, async {
            self.catch_up().await?;
            let now = self.clock.now_millis();
            let candidates: Vec<ShareGrant> = self
                .read_state()?
                .grants_to(identity)
                .into_iter()
                .filter(|g| g.is_live(now))
                .cloned()
                .collect();

            let mut shared = Vec::with_capacity(candidates.len());
            for grant in candidates {
                if self
                    .registry
                    .active_entry_of(&grant.cid, &grant.grantor, deadline)
                    .await?
                    .is_some()
                {
                    shared.push(grant);
                }
            }
            Ok(shared)
        })
        .await
    }

    /// Apply journal records appended since the last replay.
    async fn catch_up(&self) -> Result<()> {
        let from = self.read_state()?.next_seq();
        let records = self.journal.read_from(from).await?;
        if records.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().map_err(|_| AccessError::poisoned())?;
        for record in &records {
            if record.seq < state.next_seq() {
                continue;
            }
            state.apply(record)?;
        }
        Ok(())
    }

    async fn within<T, F>(&self, deadline: Deadline, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = match self.registry.config().op_timeout() {
            Some(limit) => deadline.min_with(limit),
            None => deadline,
        };
        if deadline.is_expired() {
            return Err(AccessError::Timeout);
        }
        match deadline.instant() {
            Some(at) => tokio::time::timeout_at(tokio::time::Instant::from_std(at), operation)
                .await
                .map_err(|_| AccessError::Timeout)?,
            None => operation.await,
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, PermissionState>> {
        self.state.read().map_err(|_| AccessError::poisoned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchain_core::{Codec, Keypair, ManualClock, Metadata, Visibility};
    use docchain_ledger::{Attestor, LedgerConfig, LedgerError, MemoryLog};
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        registry: Arc<RegistryLedger>,
        access: AccessControl,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000));
        let attestor = Attestor::new(Keypair::from_seed(&[0x11; 32]), clock.clone());
        let registry = Arc::new(
            RegistryLedger::open(
                Arc::new(MemoryLog::named("registry", attestor.clone())),
                LedgerConfig::default(),
            )
            .await
            .unwrap(),
        );
        let journal = Arc::new(MemoryLog::named("journal", attestor));
        let access = AccessControl::open(registry.clone(), journal, clock.clone())
            .await
            .unwrap();
        Fixture {
            clock,
            registry,
            access,
        }
    }

    fn identity(seed: u8) -> Identity {
        Keypair::from_seed(&[seed; 32]).identity()
    }

    fn soon() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    async fn registered(f: &Fixture, data: &[u8], owner: Identity, metadata: Metadata) -> Cid {
        let cid = Cid::of(Codec::Raw, data);
        f.registry.register(cid, owner, metadata, soon()).await.unwrap();
        cid
    }

    #[tokio::test]
    async fn test_grant_then_revoke_grant() {
        let f = fixture().await;
        let (owner, reader) = (identity(1), identity(2));
        let cid = registered(&f, b"income.pdf", owner, Metadata::new("Income Certificate")).await;

        assert!(f.access.can_access(&cid, &owner, soon()).await.unwrap());
        assert!(!f.access.can_access(&cid, &reader, soon()).await.unwrap());

        let grant = f.access.grant(cid, owner, reader, None, soon()).await.unwrap();
        assert_eq!(grant.timestamp, 10_000);
        assert!(f.access.can_access(&cid, &reader, soon()).await.unwrap());
        assert_eq!(f.access.shared_with(&reader, soon()).await.unwrap(), vec![grant]);

        f.access.revoke_grant(cid, owner, reader, soon()).await.unwrap();
        assert!(!f.access.can_access(&cid, &reader, soon()).await.unwrap());
        assert!(f.access.shared_with(&reader, soon()).await.unwrap().is_empty());
        assert_eq!(
            f.access.grants_for(&cid, soon()).await.unwrap()[0].status,
            EntryStatus::Revoked
        );
    }

    #[tokio::test]
    async fn test_revoke_grant_is_idempotent() {
        let f = fixture().await;
        let (owner, reader) = (identity(1), identity(2));
        let cid = registered(&f, b"doc", owner, Metadata::new("doc")).await;

        // Nothing granted yet.
        f.access.revoke_grant(cid, owner, reader, soon()).await.unwrap();
        assert!(f.access.journal().head().await.unwrap().is_none());

        f.access.grant(cid, owner, reader, None, soon()).await.unwrap();
        f.access.revoke_grant(cid, owner, reader, soon()).await.unwrap();
        f.access.revoke_grant(cid, owner, reader, soon()).await.unwrap();
        assert_eq!(f.access.journal().head().await.unwrap().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_grant_requires_active_owner() {
        let f = fixture().await;
        let (owner, stranger, reader) = (identity(1), identity(3), identity(2));
        let cid = registered(&f, b"doc", owner, Metadata::new("doc")).await;

        assert!(matches!(
            f.access.grant(cid, stranger, reader, None, soon()).await,
            Err(AccessError::NotOwner { .. })
        ));
        assert!(matches!(
            f.access
                .grant(Cid::of(Codec::Raw, b"unregistered"), owner, reader, None, soon())
                .await,
            Err(AccessError::NotOwner { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_grants() {
        let f = fixture().await;
        let owner = identity(1);
        let cid = registered(&f, b"doc", owner, Metadata::new("doc")).await;

        let err = f.access.grant(cid, owner, owner, None, soon()).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidGrant(_)));
        assert!(!err.is_retryable());

        assert!(matches!(
            f.access.grant(cid, owner, identity(2), Some(9_999), soon()).await,
            Err(AccessError::InvalidGrant(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_expiry() {
        let f = fixture().await;
        let (owner, reader) = (identity(1), identity(2));
        let cid = registered(&f, b"doc", owner, Metadata::new("doc")).await;

        f.access
            .grant(cid, owner, reader, Some(15_000), soon())
            .await
            .unwrap();
        f.clock.set(15_000);
        assert!(f.access.can_access(&cid, &reader, soon()).await.unwrap());
        f.clock.advance(Duration::from_millis(1));
        assert!(!f.access.can_access(&cid, &reader, soon()).await.unwrap());
        assert!(f.access.shared_with(&reader, soon()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_public_documents() {
        let f = fixture().await;
        let cid = registered(
            &f,
            b"notice",
            identity(1),
            Metadata::new("Public notice").visibility(Visibility::Public),
        )
        .await;
        assert!(f.access.can_access(&cid, &identity(9), soon()).await.unwrap());
    }

    #[tokio::test]
    async fn test_document_revocation_disables_grants() {
        let f = fixture().await;
        let (owner, reader) = (identity(1), identity(2));
        let cid = registered(&f, b"doc", owner, Metadata::new("doc")).await;
        f.access.grant(cid, owner, reader, None, soon()).await.unwrap();

        f.registry.revoke(cid, owner, soon()).await.unwrap();
        assert!(!f.access.can_access(&cid, &reader, soon()).await.unwrap());
        assert!(f.access.can_access(&cid, &owner, soon()).await.unwrap());
        assert!(f.access.shared_with(&reader, soon()).await.unwrap().is_empty());

        // The grant itself was never touched.
        assert_eq!(
            f.access.grants_for(&cid, soon()).await.unwrap()[0].status,
            EntryStatus::Active
        );
    }

    #[tokio::test]
    async fn test_expired_deadline() {
        let f = fixture().await;
        let err = f
            .access
            .can_access(&Cid::of(Codec::Raw, b"x"), &identity(1), Deadline::after(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Timeout));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_journal_replayed_on_open() {
        let f = fixture().await;
        let (owner, reader) = (identity(1), identity(2));
        let cid = registered(&f, b"doc", owner, Metadata::new("doc")).await;
        f.access.grant(cid, owner, reader, None, soon()).await.unwrap();

        let reopened = AccessControl::open(
            f.registry.clone(),
            f.access.journal().clone(),
            f.clock.clone(),
        )
        .await
        .unwrap();
        assert!(reopened.can_access(&cid, &reader, soon()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_journal_is_retryable() {
        let clock = Arc::new(ManualClock::new(0));
        let attestor = Attestor::new(Keypair::from_seed(&[0x22; 32]), clock.clone());
        let registry = Arc::new(
            RegistryLedger::open(
                Arc::new(MemoryLog::new(attestor.clone())),
                LedgerConfig::default(),
            )
            .await
            .unwrap(),
        );
        let journal = Arc::new(MemoryLog::named("journal", attestor));
        let access = AccessControl::open(registry.clone(), journal.clone(), clock)
            .await
            .unwrap();
        let owner = identity(1);
        let cid = Cid::of(Codec::Raw, b"doc");
        registry
            .register(cid, owner, Metadata::new("doc"), soon())
            .await
            .unwrap();

        journal.set_offline(true);
        let err = access
            .grant(cid, owner, identity(2), None, soon())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Ledger(LedgerError::Unavailable(_))));
        assert!(err.is_retryable());
    }
}
