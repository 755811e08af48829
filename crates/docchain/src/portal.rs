//! The DocChain facade: one handle over the store, registry, overlay and verifier.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use docchain_access::AccessControl;
use docchain_core::{Cid, Clock, Deadline, Identity, Keypair, Metadata, RegistryEntry, ShareGrant};
use docchain_ledger::{Attestor, LedgerLog, RegistryLedger};
use docchain_store::{BlockStore, ContentStore, MemoryBlockStore, SqliteBlockStore};

use crate::config::{BlockStoreConfig, DocChainConfig};
use crate::error::{DocChainError, Result};
use crate::verify::{VerificationResult, VerificationService};

/// Document registration, retrieval, sharing and verification.
///
/// Every operation takes a caller deadline, tightened to the configured
/// operation timeout.
pub struct DocChain {
    store: Arc<ContentStore>,
    registry: Arc<RegistryLedger>,
    access: Arc<AccessControl>,
    verifier: VerificationService,
    config: DocChainConfig,
}

impl DocChain {
    /// Compose already-opened components.
    ///
    /// Verification uses the store's chunking so recomputed CIDs match stored ones.
    pub fn new(
        store: Arc<ContentStore>,
        registry: Arc<RegistryLedger>,
        access: Arc<AccessControl>,
        config: DocChainConfig,
    ) -> Self {
        let verifier = VerificationService::new(registry.clone(), store.config().chunking);
        Self {
            store,
            registry,
            access,
            verifier,
            config,
        }
    }

    /// Open every component described by `config`.
    ///
    /// `operator` attests ledger records; `clock` stamps them and decides
    /// grant expiry.
    pub async fn open(config: DocChainConfig, operator: Keypair, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let mut backends: Vec<Arc<dyn BlockStore>> = Vec::with_capacity(config.block_stores.len());
        for backend in &config.block_stores {
            let backend: Arc<dyn BlockStore> = match backend {
                BlockStoreConfig::Memory => Arc::new(MemoryBlockStore::new()),
                BlockStoreConfig::Sqlite { path } => Arc::new(SqliteBlockStore::open(path).await?),
            };
            backends.push(backend);
        }
        let store = Arc::new(ContentStore::new(backends, config.store_config())?);

        let attestor = Attestor::new(operator, clock.clone());
        let log: Arc<dyn LedgerLog> = Arc::new(config.ledger.open(attestor.clone()).await?);
        let registry = Arc::new(RegistryLedger::open(log.clone(), config.ledger_config()).await?);
        let journal: Arc<dyn LedgerLog> = match &config.journal {
            None => log,
            Some(journal) => Arc::new(journal.open(attestor).await?),
        };
        let access = Arc::new(AccessControl::open(registry.clone(), journal, clock).await?);

        info!(
            block_stores = config.block_stores.len(),
            ledger = %registry.log().name(),
            journal = %access.journal().name(),
            "docchain opened"
        );
        Ok(Self::new(store, registry, access, config))
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RegistryLedger> {
        &self.registry
    }

    pub fn access(&self) -> &Arc<AccessControl> {
        &self.access
    }

    pub fn verifier(&self) -> &VerificationService {
        &self.verifier
    }

    pub fn config(&self) -> &DocChainConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Store `bytes` and register the resulting CID to `owner`.
    ///
    /// `metadata.size` is set to the payload length. If registration fails
    /// the content stays stored; it is unreferenced, not lost.
    pub async fn upload(
        &self,
        owner: Identity,
        bytes: impl Into<Bytes>,
        metadata: Metadata,
        deadline: Deadline,
    ) -> Result<RegistryEntry> {
        let deadline = self.bounded(deadline);
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        let cid = self.store.put(bytes, deadline).await?;
        let entry = self
            .registry
            .register(cid, owner, metadata.size(size), deadline)
            .await?;
        info!(%cid, %owner, size, seq = entry.seq, "document uploaded");
        Ok(entry)
    }

    /// Retrieve a document on behalf of `reader`.
    ///
    /// Fails with `AccessDenied` unless [`AccessControl::can_access`] allows it.
    pub async fn fetch(&self, cid: &Cid, reader: &Identity, deadline: Deadline) -> Result<Bytes> {
        let deadline = self.bounded(deadline);
        if !self.access.can_access(cid, reader, deadline).await? {
            warn!(%cid, %reader, "fetch denied");
            return Err(DocChainError::AccessDenied {
                cid: *cid,
                reader: *reader,
            });
        }
        Ok(self.store.get(cid, deadline).await?)
    }

    /// Revoke `owner`'s registration of `cid`.
    ///
    /// Only the ledger changes: the content stays stored and fetchable by its
    /// former owner, and verifying it is negative from now on.
    pub async fn revoke(&self, cid: Cid, owner: Identity, deadline: Deadline) -> Result<RegistryEntry> {
        Ok(self.registry.revoke(cid, owner, self.bounded(deadline)).await?)
    }

    /// The most recent active entry for `cid`.
    pub async fn lookup(&self, cid: &Cid, deadline: Deadline) -> Result<RegistryEntry> {
        Ok(self.registry.lookup(cid, self.bounded(deadline)).await?)
    }

    /// Every registry entry for `cid`, oldest first.
    pub async fn history(&self, cid: &Cid, deadline: Deadline) -> Result<Vec<RegistryEntry>> {
        Ok(self.registry.history(cid, self.bounded(deadline)).await?)
    }

    /// Documents `owner` has registered, latest entry per CID.
    pub async fn documents_of(&self, owner: &Identity, deadline: Deadline) -> Result<Vec<RegistryEntry>> {
        Ok(self.registry.documents_of(owner, self.bounded(deadline)).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sharing
    // ─────────────────────────────────────────────────────────────────────────

    /// Let `grantee` read `cid`, optionally until `expires_at` (Unix ms).
    pub async fn share(
        &self,
        cid: Cid,
        owner: Identity,
        grantee: Identity,
        expires_at: Option<i64>,
        deadline: Deadline,
    ) -> Result<ShareGrant> {
        Ok(self
            .access
            .grant(cid, owner, grantee, expires_at, self.bounded(deadline))
            .await?)
    }

    /// Withdraw a share. Succeeds if there was nothing to withdraw.
    pub async fn unshare(
        &self,
        cid: Cid,
        owner: Identity,
        grantee: Identity,
        deadline: Deadline,
    ) -> Result<()> {
        Ok(self
            .access
            .revoke_grant(cid, owner, grantee, self.bounded(deadline))
            .await?)
    }

    pub async fn can_access(&self, cid: &Cid, identity: &Identity, deadline: Deadline) -> Result<bool> {
        Ok(self.access.can_access(cid, identity, self.bounded(deadline)).await?)
    }

    /// Live shares held by `identity`.
    pub async fn shared_with(&self, identity: &Identity, deadline: Deadline) -> Result<Vec<ShareGrant>> {
        Ok(self.access.shared_with(identity, self.bounded(deadline)).await?)
    }

    /// Every share ever made on `cid`, with its current status.
    pub async fn grants_for(&self, cid: &Cid, deadline: Deadline) -> Result<Vec<ShareGrant>> {
        Ok(self.access.grants_for(cid, self.bounded(deadline)).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn verify_by_cid(&self, cid: &Cid, deadline: Deadline) -> Result<VerificationResult> {
        self.verifier.verify_by_cid(cid, self.bounded(deadline)).await
    }

    pub async fn verify_by_file(&self, bytes: &[u8], deadline: Deadline) -> Result<VerificationResult> {
        self.verifier.verify_by_file(bytes, self.bounded(deadline)).await
    }

    pub async fn verify_file_against(
        &self,
        bytes: &[u8],
        claimed: &Cid,
        deadline: Deadline,
    ) -> Result<VerificationResult> {
        self.verifier
            .verify_file_against(bytes, claimed, self.bounded(deadline))
            .await
    }

    fn bounded(&self, deadline: Deadline) -> Deadline {
        deadline.min_with(self.config.op_timeout())
    }
}
