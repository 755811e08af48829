//! The Content Store: chunked, replicated, verified storage by CID.
//!
//! `put` chunks a payload into a Merkle DAG and writes every block to every
//! backend. `get` walks the DAG from the root, fetching each block from all
//! backends in parallel; the first response that hashes to the requested CID
//! wins and the other requests are aborted. Nothing unverified is ever
//! returned.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use docchain_core::{build_dag, compute_cid, Block, ChunkingConfig, Cid, Codec, DagNode, Deadline};

use crate::error::{Result, StoreError};
use crate::traits::BlockStore;

/// Upper bound on the buffer reserved from a root node's declared size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Content store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How payloads are chunked. Determines CIDs of multi-chunk payloads.
    pub chunking: ChunkingConfig,
    /// How many backends must accept every block for a put to succeed.
    pub min_write_replicas: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            min_write_replicas: 1,
        }
    }
}

/// Summary of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub cid: Cid,
    pub codec: Codec,
    /// Payload size in bytes.
    pub size: u64,
    /// Number of direct children of the root (0 for a single raw block).
    pub links: usize,
}

/// Chunked, replicated, hash-verified content storage.
pub struct ContentStore {
    backends: Vec<Arc<dyn BlockStore>>,
    config: StoreConfig,
}

impl ContentStore {
    /// Create a content store over one or more backends.
    pub fn new(backends: Vec<Arc<dyn BlockStore>>, config: StoreConfig) -> Result<Self> {
        if backends.is_empty() {
            return Err(StoreError::Config("at least one backend is required".into()));
        }
        if config.min_write_replicas == 0 || config.min_write_replicas > backends.len() {
            return Err(StoreError::Config(format!(
                "min_write_replicas must be between 1 and {}",
                backends.len()
            )));
        }
        config.chunking.validate()?;
        Ok(Self { backends, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backends(&self) -> &[Arc<dyn BlockStore>] {
        &self.backends
    }

    /// Compute the CID `data` would be stored under, without writing.
    pub fn cid_of(&self, data: &[u8]) -> Result<Cid> {
        Ok(compute_cid(data, &self.config.chunking)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a payload and return its CID.
    ///
    /// Idempotent by content: storing the same bytes again yields the same
    /// CID and writes nothing new. Fails with `StorageUnavailable` if fewer
    /// than `min_write_replicas` backends accepted every block.
    pub async fn put(&self, data: impl Into<Bytes>, deadline: Deadline) -> Result<Cid> {
        if deadline.is_expired() {
            return Err(StoreError::Timeout);
        }
        let dag = build_dag(data, &self.config.chunking)?;
        let root = dag.root;
        let blocks: Arc<Vec<Block>> = Arc::new(dag.blocks);

        let mut writes = JoinSet::new();
        for backend in &self.backends {
            let backend = backend.clone();
            let blocks = blocks.clone();
            writes.spawn(async move {
                let mut inserted = 0usize;
                for block in blocks.iter() {
                    if backend.put_block(&block.cid, block.data.clone()).await? {
                        inserted += 1;
                    }
                }
                Ok::<_, StoreError>((backend.name().to_string(), inserted))
            });
        }

        let required = self.config.min_write_replicas;
        let mut replicas = 0usize;
        let mut failures = Vec::new();
        loop {
            let next = match join_before(&mut writes, deadline).await {
                Ok(next) => next,
                Err(timeout) => {
                    if replicas >= required {
                        break;
                    }
                    return Err(timeout);
                }
            };
            match next {
                None => break,
                Some(Ok(Ok((name, inserted)))) => {
                    debug!(backend = %name, %root, inserted, "blocks written");
                    replicas += 1;
                }
                Some(Ok(Err(e))) => {
                    warn!(%root, error = %e, "backend rejected write");
                    failures.push(e.to_string());
                }
                Some(Err(e)) => failures.push(StoreError::task_failed(e).to_string()),
            }
        }

        if replicas < required {
            return Err(StoreError::StorageUnavailable(format!(
                "{replicas} of {required} required replicas accepted {root}: {}",
                failures.join("; ")
            )));
        }

        info!(%root, size = dag.size, blocks = blocks.len(), replicas, "content stored");
        Ok(root)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Retrieve and verify a payload.
    ///
    /// Every block is re-hashed against its CID and every declared size is
    /// checked, so the returned bytes are exactly those the CID names.
    pub async fn get(&self, cid: &Cid, deadline: Deadline) -> Result<Bytes> {
        if deadline.is_expired() {
            return Err(StoreError::Timeout);
        }

        let root = self.fetch_block(cid, deadline).await?;
        if cid.codec() == Codec::Raw {
            debug!(%cid, size = root.len(), "content retrieved");
            return Ok(root);
        }

        let node = self.decode_node(cid, &root)?;
        let mut out = BytesMut::with_capacity(node.size().min(MAX_PREALLOC) as usize);

        // Depth-first, left to right: leaves come off the stack in payload order.
        let mut pending: Vec<(Cid, u64)> =
            node.links.iter().rev().map(|l| (l.cid, l.size)).collect();
        while let Some((child, expected)) = pending.pop() {
            let block = self.fetch_block(&child, deadline).await?;
            match child.codec() {
                Codec::Raw => {
                    if block.len() as u64 != expected {
                        return Err(self.size_mismatch(cid, &child, expected, block.len() as u64));
                    }
                    out.extend_from_slice(&block);
                }
                Codec::DagCbor => {
                    let inner = self.decode_node(cid, &block)?;
                    if inner.size() != expected {
                        return Err(self.size_mismatch(cid, &child, expected, inner.size()));
                    }
                    pending.extend(inner.links.iter().rev().map(|l| (l.cid, l.size)));
                }
            }
        }

        debug!(%cid, size = out.len(), "content retrieved");
        Ok(out.freeze())
    }

    /// Describe a stored object from its root block.
    pub async fn stat(&self, cid: &Cid, deadline: Deadline) -> Result<ObjectStat> {
        let root = self.fetch_block(cid, deadline).await?;
        Ok(match cid.codec() {
            Codec::Raw => ObjectStat {
                cid: *cid,
                codec: Codec::Raw,
                size: root.len() as u64,
                links: 0,
            },
            Codec::DagCbor => {
                let node = self.decode_node(cid, &root)?;
                ObjectStat {
                    cid: *cid,
                    codec: Codec::DagCbor,
                    size: node.size(),
                    links: node.links.len(),
                }
            }
        })
    }

    /// Whether any backend holds the root block of `cid`.
    pub async fn has(&self, cid: &Cid, deadline: Deadline) -> Result<bool> {
        match self.fetch_block(cid, deadline).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch one block from all backends in parallel; first verified copy wins.
    async fn fetch_block(&self, cid: &Cid, deadline: Deadline) -> Result<Bytes> {
        let mut requests = JoinSet::new();
        for backend in &self.backends {
            let backend = backend.clone();
            let cid = *cid;
            requests.spawn(async move {
                let result = backend.get_block(&cid).await;
                (backend.name().to_string(), result)
            });
        }

        let mut corrupt = 0usize;
        let mut absent = 0usize;
        let mut failures = Vec::new();
        while let Some(joined) = join_before(&mut requests, deadline).await? {
            match joined {
                Ok((name, Ok(Some(data)))) => {
                    if cid.matches(&data) {
                        // Dropping the set aborts the slower requests.
                        requests.abort_all();
                        return Ok(data);
                    }
                    warn!(backend = %name, %cid, "block failed hash verification");
                    corrupt += 1;
                }
                Ok((_, Ok(None))) => absent += 1,
                Ok((name, Err(e))) => {
                    debug!(backend = %name, %cid, error = %e, "backend read failed");
                    failures.push(e.to_string());
                }
                Err(e) => failures.push(StoreError::task_failed(e).to_string()),
            }
        }

        if corrupt > 0 {
            return Err(StoreError::IntegrityMismatch {
                cid: *cid,
                reason: format!("{corrupt} backend(s) returned bytes with a different hash"),
            });
        }
        if absent == 0 {
            return Err(StoreError::StorageUnavailable(failures.join("; ")));
        }
        Err(StoreError::NotFound(*cid))
    }

    fn decode_node(&self, root: &Cid, block: &[u8]) -> Result<DagNode> {
        DagNode::decode(block).map_err(|e| {
            warn!(%root, error = %e, "verified block is not a valid DAG node");
            StoreError::IntegrityMismatch {
                cid: *root,
                reason: e.to_string(),
            }
        })
    }

    fn size_mismatch(&self, root: &Cid, child: &Cid, expected: u64, actual: u64) -> StoreError {
        warn!(%root, %child, expected, actual, "DAG size mismatch");
        StoreError::IntegrityMismatch {
            cid: *root,
            reason: format!("block {child} is {actual} bytes, link declares {expected}"),
        }
    }
}

/// Wait for the next task in `set`, bounded by `deadline`.
async fn join_before<T: 'static>(
    set: &mut JoinSet<T>,
    deadline: Deadline,
) -> Result<Option<std::result::Result<T, tokio::task::JoinError>>> {
    match deadline.instant() {
        Some(at) => tokio::time::timeout_at(tokio::time::Instant::from_std(at), set.join_next())
            .await
            .map_err(|_| StoreError::Timeout),
        None => Ok(set.join_next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlockStore;
    use docchain_core::Link;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed.max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    fn small_chunks() -> StoreConfig {
        StoreConfig {
            chunking: ChunkingConfig::fixed(1024).with_max_links(4),
            min_write_replicas: 1,
        }
    }

    fn store_over(backends: &[Arc<MemoryBlockStore>], config: StoreConfig) -> ContentStore {
        let backends = backends
            .iter()
            .map(|b| b.clone() as Arc<dyn BlockStore>)
            .collect();
        ContentStore::new(backends, config).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_small() {
        let backend = Arc::new(MemoryBlockStore::new());
        let store = store_over(&[backend], StoreConfig::default());

        let cid = store.put(&b"income certificate"[..], Deadline::none()).await.unwrap();
        assert_eq!(cid.codec(), Codec::Raw);
        let bytes = store.get(&cid, Deadline::none()).await.unwrap();
        assert_eq!(&bytes[..], b"income certificate");
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_multi_level_dag() {
        let backend = Arc::new(MemoryBlockStore::new());
        let store = store_over(&[backend.clone()], small_chunks());
        let data = pseudo_random(40 * 1024 + 3, 7);

        let cid = store.put(data.clone(), Deadline::none()).await.unwrap();
        assert_eq!(cid.codec(), Codec::DagCbor);
        assert_eq!(store.cid_of(&data).unwrap(), cid);

        let bytes = store.get(&cid, Deadline::none()).await.unwrap();
        assert_eq!(bytes.as_ref(), data.as_slice());

        let stat = store.stat(&cid, Deadline::none()).await.unwrap();
        assert_eq!(stat.size, data.len() as u64);
        assert!(stat.links <= 4);
    }

    #[tokio::test]
    async fn test_put_is_idempotent_and_deduplicates() {
        let backend = Arc::new(MemoryBlockStore::new());
        let store = store_over(&[backend.clone()], small_chunks());
        let data = pseudo_random(8 * 1024, 9);

        let first = store.put(data.clone(), Deadline::none()).await.unwrap();
        let count = backend.block_count().await.unwrap();
        let second = store.put(data, Deadline::none()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.block_count().await.unwrap(), count);
    }

    #[tokio::test]
    async fn test_overlapping_files_share_blocks() {
        let backend = Arc::new(MemoryBlockStore::new());
        let store = store_over(&[backend.clone()], small_chunks());
        let base = pseudo_random(8 * 1024, 11);
        let mut extended = base.clone();
        extended.extend_from_slice(&pseudo_random(1024, 12));

        store.put(base, Deadline::none()).await.unwrap();
        let before = backend.block_count().await.unwrap();
        store.put(extended, Deadline::none()).await.unwrap();
        let after = backend.block_count().await.unwrap();
        // Only the new leaf and the new interior nodes are added.
        assert!(after - before < 5, "added {} blocks", after - before);
    }

    #[tokio::test]
    async fn test_distinct_payloads_distinct_cids() {
        let store = store_over(&[Arc::new(MemoryBlockStore::new())], small_chunks());
        let data = pseudo_random(3000, 13);
        let mut cids = HashSet::new();
        cids.insert(store.cid_of(&data).unwrap());
        for bit in 0..64 {
            let mut flipped = data.clone();
            flipped[(bit * 47) % data.len()] ^= 1 << (bit % 8);
            assert!(cids.insert(store.cid_of(&flipped).unwrap()));
        }
    }

    #[tokio::test]
    async fn test_get_unknown_cid_is_not_found() {
        let store = store_over(&[Arc::new(MemoryBlockStore::new())], StoreConfig::default());
        let cid = Cid::of(Codec::Raw, b"never stored");
        assert!(matches!(
            store.get(&cid, Deadline::none()).await,
            Err(StoreError::NotFound(c)) if c == cid
        ));
        assert!(!store.has(&cid, Deadline::none()).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_block_is_rejected() {
        let backend = Arc::new(MemoryBlockStore::new());
        let store = store_over(&[backend.clone()], StoreConfig::default());
        let cid = store.put(&b"original"[..], Deadline::none()).await.unwrap();

        backend.tamper(&cid, &b"tampered"[..]).unwrap();
        assert!(matches!(
            store.get(&cid, Deadline::none()).await,
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_leaf_inside_dag_is_rejected() {
        let backend = Arc::new(MemoryBlockStore::new());
        let store = store_over(&[backend.clone()], small_chunks());
        let data = pseudo_random(4 * 1024, 15);
        let cid = store.put(data.clone(), Deadline::none()).await.unwrap();

        let leaf = Cid::of(Codec::Raw, &data[1024..2048]);
        backend.tamper(&leaf, vec![0u8; 1024]).unwrap();
        assert!(matches!(
            store.get(&cid, Deadline::none()).await,
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_node_declaring_huge_size_is_rejected() {
        let backend = Arc::new(MemoryBlockStore::new());
        let store = store_over(&[backend.clone()], StoreConfig::default());

        let leaf = Cid::of(Codec::Raw, b"x");
        let node = DagNode {
            links: vec![
                Link { cid: leaf, size: 1 },
                Link {
                    cid: leaf,
                    size: 1 << 62,
                },
            ],
        };
        let encoded = node.encode();
        let root = Cid::of(Codec::DagCbor, &encoded);
        backend.put_block(&leaf, Bytes::from_static(b"x")).await.unwrap();
        backend.put_block(&root, Bytes::from(encoded)).await.unwrap();

        assert!(matches!(
            store.get(&root, Deadline::none()).await,
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_healthy_replica_masks_corrupt_one() {
        let bad = Arc::new(MemoryBlockStore::named("bad"));
        let good = Arc::new(MemoryBlockStore::named("good").with_latency(Duration::from_millis(20)));
        let store = store_over(&[bad.clone(), good], StoreConfig::default());

        let cid = store.put(&b"payload"[..], Deadline::none()).await.unwrap();
        bad.tamper(&cid, &b"garbage"[..]).unwrap();

        let bytes = store.get(&cid, Deadline::none()).await.unwrap();
        assert_eq!(&bytes[..], b"payload");
    }

    #[tokio::test]
    async fn test_first_verified_response_wins() {
        let fast = Arc::new(MemoryBlockStore::named("fast"));
        let slow = Arc::new(MemoryBlockStore::named("slow").with_latency(Duration::from_secs(30)));
        let store = store_over(&[fast.clone(), slow.clone()], StoreConfig::default());

        // Only the fast backend holds the block; the slow one is still sleeping when it answers.
        let cid = Cid::of(Codec::Raw, b"doc");
        fast.put_block(&cid, Bytes::from_static(b"doc")).await.unwrap();

        let bytes = store
            .get(&cid, Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"doc");
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout_not_not_found() {
        let slow = Arc::new(MemoryBlockStore::named("slow").with_latency(Duration::from_secs(30)));
        let store = store_over(&[slow], StoreConfig::default());
        let cid = Cid::of(Codec::Raw, b"doc");

        let result = store
            .get(&cid, Deadline::after(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(StoreError::Timeout)));
        assert!(StoreError::Timeout.is_retryable());
        assert!(!StoreError::NotFound(cid).is_retryable());
    }

    #[tokio::test]
    async fn test_write_quorum() {
        let a = Arc::new(MemoryBlockStore::named("a"));
        let b = Arc::new(MemoryBlockStore::named("b"));
        let config = StoreConfig {
            min_write_replicas: 2,
            ..StoreConfig::default()
        };
        let store = store_over(&[a.clone(), b.clone()], config);

        store.put(&b"one"[..], Deadline::none()).await.unwrap();

        b.set_read_only(true);
        assert!(matches!(
            store.put(&b"two"[..], Deadline::none()).await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_single_replica_survives_offline_backend() {
        let a = Arc::new(MemoryBlockStore::named("a"));
        let b = Arc::new(MemoryBlockStore::named("b"));
        let store = store_over(&[a.clone(), b.clone()], StoreConfig::default());

        a.set_offline(true);
        let cid = store.put(&b"resilient"[..], Deadline::none()).await.unwrap();
        assert_eq!(&store.get(&cid, Deadline::none()).await.unwrap()[..], b"resilient");

        b.set_offline(true);
        assert!(matches!(
            store.get(&cid, Deadline::none()).await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_invalid_configuration() {
        let backends: Vec<Arc<dyn BlockStore>> = vec![Arc::new(MemoryBlockStore::new())];
        assert!(ContentStore::new(Vec::new(), StoreConfig::default()).is_err());
        let config = StoreConfig {
            min_write_replicas: 2,
            ..StoreConfig::default()
        };
        assert!(matches!(
            ContentStore::new(backends, config),
            Err(StoreError::Config(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_get_returns_what_was_put(data in proptest::collection::vec(any::<u8>(), 0..6000)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let store = store_over(&[Arc::new(MemoryBlockStore::new())], small_chunks());
            let bytes = rt.block_on(async {
                let cid = store.put(data.clone(), Deadline::none()).await.unwrap();
                store.get(&cid, Deadline::none()).await.unwrap()
            });
            prop_assert_eq!(bytes.as_ref(), data.as_slice());
        }
    }
}
