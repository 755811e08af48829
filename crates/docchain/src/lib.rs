//! # DocChain
//!
//! Document registration and verification: content-addressed storage, a
//! tamper-evident registry of who registered what and when, and read grants.
//!
//! ## Overview
//!
//! - **Content Store**: payloads are chunked into a Merkle DAG and stored by
//!   CID; every read is re-hashed before it is returned
//! - **Registry Ledger**: an append-only, hash-chained, attested log of
//!   registrations and revocations
//! - **Verification Service**: recomputes a file's CID and checks it has an
//!   active registration, with a proof of the matching ledger record
//! - **Access Control Overlay**: owner-issued read grants with optional expiry
//!
//! ## Key Concepts
//!
//! - **CID**: a pure function of the bytes. Any change gives a different CID.
//! - **Revocation**: appends a record. Nothing is deleted; the content stays
//!   stored but no longer verifies.
//! - **Deadline**: every operation takes one and reports `Timeout` when it
//!   passes, distinct from `NotFound`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docchain::{DocChain, DocChainConfig};
//! use docchain::core::{Deadline, Keypair, Metadata, SystemClock};
//!
//! async fn example() -> docchain::Result<()> {
//!     let config = DocChainConfig::from_file("docchain.json")?;
//!     let docs = DocChain::open(config, Keypair::generate(), Arc::new(SystemClock)).await?;
//!
//!     let owner = Keypair::generate().identity();
//!     let bytes = std::fs::read("income.pdf")?;
//!     let entry = docs
//!         .upload(owner, bytes.clone(), Metadata::new("Income Certificate"), Deadline::none())
//!         .await?;
//!
//!     let result = docs.verify_by_file(&bytes, Deadline::none()).await?;
//!     assert!(result.verified);
//!     assert_eq!(result.matched_entry, Some(entry));
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `docchain::core` - CIDs, keys, chunking, ledger records
//! - `docchain::store` - Content Store and block stores
//! - `docchain::ledger` - Registry Ledger and its log backends
//! - `docchain::access` - Access Control Overlay

pub mod config;
pub mod error;
pub mod portal;
pub mod verify;

// Re-export component crates
pub use docchain_access as access;
pub use docchain_core as core;
pub use docchain_ledger as ledger;
pub use docchain_store as store;

pub use config::{BlockStoreConfig, DocChainConfig};
pub use error::{DocChainError, Result};
pub use portal::DocChain;
pub use verify::{Proof, VerificationResult, VerificationService};

// Re-export commonly used core types
pub use docchain_core::{
    Cid, Deadline, EntryStatus, Identity, Keypair, Metadata, RegistryEntry, ShareGrant, Visibility,
};
