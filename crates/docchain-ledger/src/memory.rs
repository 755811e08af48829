//! In-memory ledger log.
//!
//! Used by tests and as a quorum member in process. It can simulate an
//! unreachable or slow node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use docchain_core::{validate_chain, ChainHead, Identity, LedgerRecord, RecordBody};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::log::{check_offer, first_seq, tampered, Accepted, Attestor, LedgerLog, Replica};

/// In-memory ledger log. All records are lost when it is dropped.
pub struct MemoryLog {
    name: String,
    attestor: Attestor,
    records: Mutex<Vec<LedgerRecord>>,
    offline: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryLog {
    pub fn new(attestor: Attestor) -> Self {
        Self::named("memory", attestor)
    }

    pub fn named(name: impl Into<String>, attestor: Attestor) -> Self {
        Self {
            name: name.into(),
            attestor,
            records: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            latency: None,
        }
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every operation fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Replace the record at `seq` without any checks.
    ///
    /// Simulates tampering with stored history.
    pub fn tamper(&self, seq: u64, record: LedgerRecord) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| LedgerError::poisoned(&self.name))?;
        let slot = records
            .get_mut((seq as usize).saturating_sub(1))
            .ok_or(LedgerError::NoSuchRecord(seq))?;
        *slot = record;
        Ok(())
    }

    async fn enter(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(format!("{} is offline", self.name)));
        }
        Ok(())
    }

    fn slice(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        let records = self.records.lock().map_err(|_| LedgerError::poisoned(&self.name))?;
        let start = (first_seq(from) - 1) as usize;
        Ok(records.iter().skip(start).take(limit).cloned().collect())
    }

    fn current_head(&self) -> Result<Option<ChainHead>> {
        let records = self.records.lock().map_err(|_| LedgerError::poisoned(&self.name))?;
        Ok(records.last().map(LedgerRecord::head))
    }
}

#[async_trait]
impl LedgerLog for MemoryLog {
    fn name(&self) -> &str {
        &self.name
    }

    fn attestor(&self) -> Identity {
        self.attestor.identity()
    }

    async fn append(&self, body: RecordBody) -> Result<LedgerRecord> {
        self.enter().await?;
        let mut records = self.records.lock().map_err(|_| LedgerError::poisoned(&self.name))?;
        let head = records.last().map(LedgerRecord::head);
        let record = self.attestor.attest(head.as_ref(), body);
        records.push(record.clone());
        debug!(log = %self.name, seq = record.seq, "record appended");
        Ok(record)
    }

    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        self.enter().await?;
        self.slice(from, limit)
    }

    async fn head(&self) -> Result<Option<ChainHead>> {
        self.enter().await?;
        self.current_head()
    }

    async fn verify_chain(&self) -> Result<Option<ChainHead>> {
        self.enter().await?;
        let records = self.records.lock().map_err(|_| LedgerError::poisoned(&self.name))?;
        validate_chain(records.iter()).map_err(tampered)
    }
}

#[async_trait]
impl Replica for MemoryLog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&self, record: &LedgerRecord) -> Result<Accepted> {
        self.enter().await?;
        let mut records = self.records.lock().map_err(|_| LedgerError::poisoned(&self.name))?;
        let head = records.last().map(LedgerRecord::head);
        let outcome = check_offer(head.as_ref(), record, |seq| {
            Ok(records.get(seq as usize - 1).map(LedgerRecord::hash))
        })?;
        if outcome == Accepted::Appended {
            records.push(record.clone());
        }
        Ok(outcome)
    }

    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        self.enter().await?;
        self.slice(from, limit)
    }

    async fn head(&self) -> Result<Option<ChainHead>> {
        self.enter().await?;
        self.current_head()
    }
}
