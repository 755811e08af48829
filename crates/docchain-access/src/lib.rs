//! # DocChain Access
//!
//! Read capabilities on registered documents.
//!
//! ## Overview
//!
//! Sharing is expressed as records, not flags. A `Grant` record gives a
//! grantee read access to a CID, an `Ungrant` record withdraws it, and
//! the current [`PermissionState`] is computed by replaying the access
//! journal. Grants live outside the registry, so sharing never alters a
//! document's registration, and a document's authenticity never depends
//! on who it was shared with.
//!
//! ## Key Types
//!
//! - [`AccessControl`] - `grant`, `revoke_grant`, `can_access`, `shared_with`
//! - [`PermissionState`] - Grants replayed from the journal
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docchain_access::AccessControl;
//! use docchain_core::{Cid, Codec, Deadline, Keypair, Metadata, SystemClock};
//! use docchain_ledger::{Attestor, LedgerConfig, MemoryLog, RegistryLedger};
//!
//! async fn example() -> docchain_access::Result<()> {
//!     let attestor = Attestor::new(Keypair::generate(), Arc::new(SystemClock));
//!     let registry = Arc::new(
//!         RegistryLedger::open(Arc::new(MemoryLog::new(attestor.clone())), LedgerConfig::default())
//!             .await?,
//!     );
//!     let journal = Arc::new(MemoryLog::named("journal", attestor));
//!     let access = AccessControl::open(registry.clone(), journal, Arc::new(SystemClock)).await?;
//!
//!     let (owner, reader) = (Keypair::generate().identity(), Keypair::generate().identity());
//!     let cid = Cid::of(Codec::Raw, b"report");
//!     registry.register(cid, owner, Metadata::new("Report"), Deadline::none()).await?;
//!
//!     access.grant(cid, owner, reader, None, Deadline::none()).await?;
//!     assert!(access.can_access(&cid, &reader, Deadline::none()).await?);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod overlay;
pub mod state;

pub use error::{AccessError, Result};
pub use overlay::AccessControl;
pub use state::{GrantKey, PermissionState};
