//! # DocChain Testkit
//!
//! Testing utilities for DocChain.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Vectors**: Payloads with the DAG shape they must chunk into, and a fixed attested chain
//! - **Generators**: Proptest strategies for keys, CIDs, metadata, chunking configs and records
//! - **Fixtures**: An in-memory [`DocChain`](docchain::DocChain) on a manual clock
//!
//! ## Vectors
//!
//! ```rust
//! use docchain_testkit::vectors::verify_chunk_vectors;
//!
//! for outcome in verify_chunk_vectors() {
//!     assert!(outcome.passed, "{}: {}", outcome.name, outcome.detail);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use docchain_testkit::generators::{record_from_params, RecordParams};
//!
//! proptest! {
//!     #[test]
//!     fn record_hash_is_deterministic(params: RecordParams) {
//!         prop_assert_eq!(record_from_params(&params).hash(), record_from_params(&params).hash());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use docchain_testkit::fixtures::{parties, payload, TestFixture};
//!
//! async fn example() -> docchain::Result<()> {
//!     let fixture = TestFixture::new().await?;
//!     let owner = parties(1)[0].identity();
//!     let entry = fixture.upload(owner, &payload(1, 10_000)).await?;
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{parties, payload, TestFixture};
pub use generators::{record_from_params, RecordParams};
pub use vectors::{chunk_vectors, export_json, record_chain, verify_chunk_vectors, ChunkVector};
