//! # DocChain Store
//!
//! The Content Store: payloads in, CIDs out, and back again.
//!
//! ## Overview
//!
//! Payloads are chunked into a Merkle DAG (see [`docchain_core::chunk`]) and
//! the blocks written to one or more [`BlockStore`] backends. Reads fan out
//! across all backends, and every block is re-hashed before it is used, so
//! corrupt or substituted data surfaces as [`StoreError::IntegrityMismatch`]
//! instead of being returned.
//!
//! ## Key Types
//!
//! - [`ContentStore`] - Chunked put, verified fan-out get
//! - [`BlockStore`] - The async trait for one storage medium
//! - [`SqliteBlockStore`] - SQLite-based persistent block storage
//! - [`MemoryBlockStore`] - In-memory storage with fault injection for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docchain_core::Deadline;
//! use docchain_store::{ContentStore, SqliteBlockStore, StoreConfig};
//!
//! async fn example() -> docchain_store::Result<()> {
//!     let backend = Arc::new(SqliteBlockStore::open("blocks.db").await?);
//!     let store = ContentStore::new(vec![backend], StoreConfig::default())?;
//!
//!     let cid = store.put(b"hello".to_vec(), Deadline::none()).await?;
//!     let bytes = store.get(&cid, Deadline::none()).await?;
//!     assert_eq!(&bytes[..], b"hello");
//!     Ok(())
//! }
//! ```
//!
//! Nothing is ever deleted: blocks are immutable and shared between payloads.

pub mod content;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use content::{ContentStore, ObjectStat, StoreConfig};
pub use error::{Result, StoreError};
pub use memory::MemoryBlockStore;
pub use sqlite::SqliteBlockStore;
pub use traits::BlockStore;
