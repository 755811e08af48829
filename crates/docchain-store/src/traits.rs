//! BlockStore trait: the abstract interface for block persistence.
//!
//! A block store is one storage medium (a node, a disk, a database). The
//! [`ContentStore`](crate::ContentStore) chunks payloads into blocks and fans
//! reads and writes out across several of them.

use async_trait::async_trait;
use bytes::Bytes;
use docchain_core::Cid;

use crate::error::Result;

/// Async interface for content-addressed block persistence.
///
/// # Design Notes
///
/// - **Idempotent puts**: putting a CID that already exists returns `false`
///   and never overwrites the stored bytes.
/// - **No verification**: backends store and return bytes as-is; callers
///   re-hash everything they read.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Store a block. Returns `true` if it was newly inserted.
    async fn put_block(&self, cid: &Cid, data: Bytes) -> Result<bool>;

    /// Fetch a block.
    async fn get_block(&self, cid: &Cid) -> Result<Option<Bytes>>;

    /// Check if a block exists.
    async fn has_block(&self, cid: &Cid) -> Result<bool>;

    /// Number of stored blocks.
    async fn block_count(&self) -> Result<u64>;
}
