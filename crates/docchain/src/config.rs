//! DocChain configuration.
//!
//! One serde struct covering every component, loadable from JSON. It is
//! passed explicitly to [`DocChain::open`](crate::DocChain::open); nothing
//! is read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docchain_core::ChunkingConfig;
use docchain_ledger::{LedgerBackendConfig, LedgerConfig, RegistrationPolicy};
use docchain_store::StoreConfig;

use crate::error::{DocChainError, Result};

/// A block store backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockStoreConfig {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

/// Configuration for a [`DocChain`](crate::DocChain).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocChainConfig {
    /// How payloads are chunked. Changing it changes the CIDs of large files.
    pub chunking: ChunkingConfig,
    /// Block store backends; reads fan out across all of them.
    pub block_stores: Vec<BlockStoreConfig>,
    /// Backends that must accept a payload for an upload to succeed.
    pub min_write_replicas: usize,
    /// Upper bound on a single operation, in milliseconds.
    pub op_timeout_ms: u64,
    /// Who may hold an active registration for a CID.
    pub registration: RegistrationPolicy,
    /// The registry log.
    pub ledger: LedgerBackendConfig,
    /// The access journal. `None` keeps grants in the registry log.
    pub journal: Option<LedgerBackendConfig>,
}

impl Default for DocChainConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            block_stores: vec![BlockStoreConfig::Memory],
            min_write_replicas: 1,
            op_timeout_ms: 30_000,
            registration: RegistrationPolicy::PerOwner,
            ledger: LedgerBackendConfig::Memory,
            journal: None,
        }
    }
}

impl DocChainConfig {
    /// Parse from a JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the configuration without opening anything.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.block_stores.is_empty() {
            return Err(DocChainError::Config("at least one block store is required".into()));
        }
        if self.min_write_replicas == 0 || self.min_write_replicas > self.block_stores.len() {
            return Err(DocChainError::Config(format!(
                "min_write_replicas must be between 1 and {}",
                self.block_stores.len()
            )));
        }
        if self.op_timeout_ms == 0 {
            return Err(DocChainError::Config("op_timeout_ms must be positive".into()));
        }
        if self.ledger != LedgerBackendConfig::Memory && self.journal.as_ref() == Some(&self.ledger) {
            return Err(DocChainError::Config(
                "journal must not reuse the ledger's storage; omit it to share the log".into(),
            ));
        }
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            chunking: self.chunking,
            min_write_replicas: self.min_write_replicas,
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            registration: self.registration,
            op_timeout_ms: Some(self.op_timeout_ms),
        }
    }
}
