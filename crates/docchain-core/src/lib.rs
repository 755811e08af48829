//! # DocChain Core
//!
//! Pure primitives for DocChain: content identifiers, Merkle chunking,
//! deterministic encoding and hash-chained ledger records.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Cid`] - Content identifier derived from a block's Blake3 digest
//! - [`Dag`] - A chunked payload: raw leaves linked by [`DagNode`]s
//! - [`LedgerRecord`] - An attested, hash-chained registry event
//! - [`RegistryEntry`] / [`ShareGrant`] - State derived from records
//! - [`Clock`] / [`Deadline`] - Injected time and caller-supplied deadlines
//!
//! ## Canonicalization
//!
//! DAG nodes and ledger records are encoded using deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod chunk;
pub mod cid;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod record;
pub mod validation;

pub use canonical::{decode_canonical, encode_canonical, is_truncated};
pub use chunk::{
    build_dag, compute_cid, Block, ChunkStrategy, ChunkingConfig, Dag, DagNode, Link,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS,
};
pub use cid::{Cid, Codec};
pub use clock::{Clock, Deadline, ManualClock, SystemClock};
pub use crypto::{Blake3Hash, Identity, Keypair, Signature};
pub use error::{CoreError, LinkError};
pub use record::{
    ChainHead, EntryStatus, LedgerRecord, Metadata, RecordBody, RecordKind, RegistryEntry,
    ShareGrant, Visibility,
};
pub use validation::{validate_chain, validate_link};
