//! In-memory implementation of the BlockStore trait.
//!
//! Primarily for tests. Besides plain storage it can simulate the failure
//! modes of a remote medium: going offline, refusing writes, responding
//! slowly, and returning corrupted bytes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use docchain_core::Cid;

use crate::error::{Result, StoreError};
use crate::traits::BlockStore;

/// In-memory block store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryBlockStore {
    name: String,
    blocks: RwLock<HashMap<Cid, Bytes>>,
    offline: AtomicBool,
    read_only: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryBlockStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a new empty store with a name for logs.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
            latency: None,
        }
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every operation fail with `StorageUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make writes fail with `StorageUnavailable`; reads still work.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Overwrite the stored bytes of a block, bypassing idempotence.
    ///
    /// Simulates silent corruption of the medium.
    pub fn tamper(&self, cid: &Cid, data: impl Into<Bytes>) -> Result<()> {
        let mut blocks = self.blocks.write().map_err(|_| StoreError::poisoned(&self.name))?;
        blocks.insert(*cid, data.into());
        Ok(())
    }

    /// Remove a block, simulating loss.
    pub fn evict(&self, cid: &Cid) -> Result<bool> {
        let mut blocks = self.blocks.write().map_err(|_| StoreError::poisoned(&self.name))?;
        Ok(blocks.remove(cid).is_some())
    }

    async fn enter(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::StorageUnavailable(format!("{} is offline", self.name)));
        }
        Ok(())
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_block(&self, cid: &Cid, data: Bytes) -> Result<bool> {
        self.enter().await?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::StorageUnavailable(format!("{} is read-only", self.name)));
        }
        let mut blocks = self.blocks.write().map_err(|_| StoreError::poisoned(&self.name))?;
        if blocks.contains_key(cid) {
            return Ok(false);
        }
        blocks.insert(*cid, data);
        Ok(true)
    }

    async fn get_block(&self, cid: &Cid) -> Result<Option<Bytes>> {
        self.enter().await?;
        let blocks = self.blocks.read().map_err(|_| StoreError::poisoned(&self.name))?;
        Ok(blocks.get(cid).cloned())
    }

    async fn has_block(&self, cid: &Cid) -> Result<bool> {
        self.enter().await?;
        let blocks = self.blocks.read().map_err(|_| StoreError::poisoned(&self.name))?;
        Ok(blocks.contains_key(cid))
    }

    async fn block_count(&self) -> Result<u64> {
        self.enter().await?;
        let blocks = self.blocks.read().map_err(|_| StoreError::poisoned(&self.name))?;
        Ok(blocks.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchain_core::Codec;

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryBlockStore::new();
        let cid = Cid::of(Codec::Raw, b"block");

        assert!(store.put_block(&cid, Bytes::from_static(b"block")).await.unwrap());
        assert!(!store.put_block(&cid, Bytes::from_static(b"other")).await.unwrap());
        assert_eq!(
            store.get_block(&cid).await.unwrap().unwrap(),
            Bytes::from_static(b"block")
        );
        assert_eq!(store.block_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_and_read_only() {
        let store = MemoryBlockStore::named("node-a");
        let cid = Cid::of(Codec::Raw, b"x");

        store.set_read_only(true);
        assert!(matches!(
            store.put_block(&cid, Bytes::from_static(b"x")).await,
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(store.get_block(&cid).await.unwrap().is_none());

        store.set_offline(true);
        assert!(matches!(
            store.has_block(&cid).await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_tamper_and_evict() {
        let store = MemoryBlockStore::new();
        let cid = Cid::of(Codec::Raw, b"x");
        store.put_block(&cid, Bytes::from_static(b"x")).await.unwrap();

        store.tamper(&cid, Bytes::from_static(b"y")).unwrap();
        assert_eq!(store.get_block(&cid).await.unwrap().unwrap(), Bytes::from_static(b"y"));

        assert!(store.evict(&cid).unwrap());
        assert!(!store.has_block(&cid).await.unwrap());
    }
}
