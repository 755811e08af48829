//! # DocChain Ledger
//!
//! The Registry Ledger: an append-only, hash-chained, attested log of
//! document registrations and revocations.
//!
//! ## Overview
//!
//! Every registry event is a [`LedgerRecord`](docchain_core::LedgerRecord)
//! carrying the hash of its predecessor and signed by the ledger operator.
//! The chain is tamper-evident whichever [`LedgerLog`] backs it:
//!
//! - [`LocalFileLog`] - length-prefixed frames in a single append-only file
//! - [`HostedLedger`] - rows in a SQLite table, re-validated on read
//! - [`DistributedConsensusLog`] - a leader replicating to a quorum of [`Replica`]s
//! - [`MemoryLog`] - in-process, for tests and as a replica
//!
//! [`RegistryLedger`] replays the log into a [`RegistryIndex`] and enforces
//! registration rules on top of it.
//!
//! ## Key Types
//!
//! - [`RegistryLedger`] - `register`, `revoke`, `lookup`, `history`
//! - [`LedgerBackend`] / [`LedgerBackendConfig`] - Backend selection
//! - [`Attestor`] - The operator key and clock that stamp records
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docchain_core::{Cid, Codec, Deadline, Keypair, Metadata, SystemClock};
//! use docchain_ledger::{
//!     Attestor, FileLogOptions, LedgerConfig, LocalFileLog, RegistryLedger,
//! };
//!
//! async fn example() -> docchain_ledger::Result<()> {
//!     let attestor = Attestor::new(Keypair::generate(), Arc::new(SystemClock));
//!     let log = LocalFileLog::open("registry.log", attestor, FileLogOptions::default()).await?;
//!     let registry = RegistryLedger::open(Arc::new(log), LedgerConfig::default()).await?;
//!
//!     let owner = Keypair::generate().identity();
//!     let cid = Cid::of(Codec::Raw, b"hello");
//!     let entry = registry
//!         .register(cid, owner, Metadata::new("Greeting"), Deadline::none())
//!         .await?;
//!     assert_eq!(registry.lookup(&cid, Deadline::none()).await?, entry);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod file;
pub mod hosted;
pub mod index;
pub mod log;
pub mod memory;
pub mod quorum;
pub mod registry;

pub use backend::{LedgerBackend, LedgerBackendConfig};
pub use error::{LedgerError, Result};
pub use file::{FileLogOptions, LocalFileLog, MAX_FRAME_LEN};
pub use hosted::HostedLedger;
pub use index::{RegistrationPolicy, RegistryIndex};
pub use log::{Accepted, Attestor, LedgerLog, Replica};
pub use memory::MemoryLog;
pub use quorum::{DistributedConsensusLog, QuorumConfig};
pub use registry::{LedgerConfig, RegistryLedger};
