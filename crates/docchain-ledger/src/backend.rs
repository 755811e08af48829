//! Backend selection.
//!
//! [`LedgerBackend`] is the closed set of log implementations, dispatching
//! [`LedgerLog`] to whichever one is configured. [`LedgerBackendConfig`] is
//! its serializable description.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docchain_core::{ChainHead, Identity, LedgerRecord, RecordBody};

use crate::error::{LedgerError, Result};
use crate::file::{FileLogOptions, LocalFileLog};
use crate::hosted::HostedLedger;
use crate::log::{Attestor, LedgerLog, Replica};
use crate::memory::MemoryLog;
use crate::quorum::{DistributedConsensusLog, QuorumConfig};

/// One of the available ledger logs.
pub enum LedgerBackend {
    LocalFile(LocalFileLog),
    Hosted(HostedLedger),
    Memory(MemoryLog),
    Distributed(DistributedConsensusLog),
}

impl LedgerBackend {
    fn inner(&self) -> &dyn LedgerLog {
        match self {
            LedgerBackend::LocalFile(log) => log,
            LedgerBackend::Hosted(log) => log,
            LedgerBackend::Memory(log) => log,
            LedgerBackend::Distributed(log) => log,
        }
    }

    /// Short name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerBackend::LocalFile(_) => "local_file",
            LedgerBackend::Hosted(_) => "hosted",
            LedgerBackend::Memory(_) => "memory",
            LedgerBackend::Distributed(_) => "distributed",
        }
    }
}

#[async_trait]
impl LedgerLog for LedgerBackend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn attestor(&self) -> Identity {
        self.inner().attestor()
    }

    async fn append(&self, body: RecordBody) -> Result<LedgerRecord> {
        self.inner().append(body).await
    }

    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        self.inner().read_range(from, limit).await
    }

    async fn head(&self) -> Result<Option<ChainHead>> {
        self.inner().head().await
    }

    async fn verify_chain(&self) -> Result<Option<ChainHead>> {
        self.inner().verify_chain().await
    }
}

fn default_fsync() -> bool {
    true
}

/// Serializable description of a [`LedgerBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerBackendConfig {
    /// In-process log; nothing survives a restart.
    #[default]
    Memory,
    /// Append-only file.
    LocalFile {
        path: PathBuf,
        #[serde(default = "default_fsync")]
        fsync: bool,
    },
    /// SQLite database.
    Hosted { path: PathBuf },
    /// Quorum replication over storage backends.
    Distributed {
        replicas: Vec<LedgerBackendConfig>,
        #[serde(default)]
        quorum: QuorumConfig,
    },
}

impl LedgerBackendConfig {
    /// Open the described backend, attesting with `attestor`.
    pub async fn open(&self, attestor: Attestor) -> Result<LedgerBackend> {
        Ok(match self {
            LedgerBackendConfig::Memory => LedgerBackend::Memory(MemoryLog::new(attestor)),
            LedgerBackendConfig::LocalFile { path, fsync } => LedgerBackend::LocalFile(
                LocalFileLog::open(path, attestor, FileLogOptions { fsync: *fsync }).await?,
            ),
            LedgerBackendConfig::Hosted { path } => {
                LedgerBackend::Hosted(HostedLedger::open(path, attestor).await?)
            }
            LedgerBackendConfig::Distributed { replicas, quorum } => {
                let mut members = Vec::with_capacity(replicas.len());
                for replica in replicas {
                    members.push(replica.open_replica(attestor.clone()).await?);
                }
                LedgerBackend::Distributed(
                    DistributedConsensusLog::open(members, attestor, *quorum).await?,
                )
            }
        })
    }

    async fn open_replica(&self, attestor: Attestor) -> Result<Arc<dyn Replica>> {
        let replica: Arc<dyn Replica> = match self {
            LedgerBackendConfig::Memory => Arc::new(MemoryLog::new(attestor)),
            LedgerBackendConfig::LocalFile { path, fsync } => Arc::new(
                LocalFileLog::open(path, attestor, FileLogOptions { fsync: *fsync }).await?,
            ),
            LedgerBackendConfig::Hosted { path } => Arc::new(HostedLedger::open(path, attestor).await?),
            LedgerBackendConfig::Distributed { .. } => {
                return Err(LedgerError::Config(
                    "a distributed ledger cannot be a replica".into(),
                ))
            }
        };
        Ok(replica)
    }
}
