//! Quorum-replicated ledger.
//!
//! A single leader builds and attests every record, then offers it to all
//! replicas in parallel. The append commits once `quorum` replicas have
//! accepted it. Reads only return records that a quorum of replicas hold
//! with identical hashes, so a minority of faulty or tampered replicas can
//! neither hide nor rewrite history.
//!
//! # Failed commits
//!
//! When fewer than `quorum` replicas accept a record, some of them may still
//! hold it. The leader keeps that record as *pending* and reports
//! `Unavailable`. The next append first re-offers the pending record. If it
//! now commits, that append returns `Reconciled` so the caller can re-read
//! state, since the earlier write did take effect.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use docchain_core::{validate_link, Blake3Hash, ChainHead, Identity, LedgerRecord, RecordBody};

use crate::error::{LedgerError, Result};
use crate::log::{first_seq, tampered, Accepted, Attestor, LedgerLog, Replica};

/// Replication settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    /// Acks required to commit. `None` means a simple majority.
    pub quorum: Option<usize>,
    /// Budget for a single replica call, in milliseconds.
    pub replica_timeout_ms: u64,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            quorum: None,
            replica_timeout_ms: 2_000,
        }
    }
}

/// A ledger log replicated across several [`Replica`]s.
pub struct DistributedConsensusLog {
    name: String,
    attestor: Attestor,
    replicas: Vec<Arc<dyn Replica>>,
    quorum: usize,
    replica_timeout: Duration,
    committed: RwLock<Option<ChainHead>>,
    /// Serializes appends. Holds a record that failed to reach quorum.
    pending: tokio::sync::Mutex<Option<LedgerRecord>>,
}

impl DistributedConsensusLog {
    /// Connect to the replicas and recover the committed head from them.
    pub async fn open(
        replicas: Vec<Arc<dyn Replica>>,
        attestor: Attestor,
        config: QuorumConfig,
    ) -> Result<Self> {
        let n = replicas.len();
        if n == 0 {
            return Err(LedgerError::Config("at least one replica is required".into()));
        }
        let quorum = config.quorum.unwrap_or(n / 2 + 1);
        if quorum <= n / 2 || quorum > n {
            return Err(LedgerError::Config(format!(
                "quorum must be a majority of {n} replicas, got {quorum}"
            )));
        }
        if config.replica_timeout_ms == 0 {
            return Err(LedgerError::Config("replica_timeout_ms must be positive".into()));
        }

        let log = Self {
            name: format!("quorum:{quorum}/{n}"),
            attestor,
            replicas,
            quorum,
            replica_timeout: Duration::from_millis(config.replica_timeout_ms),
            committed: RwLock::new(None),
            pending: tokio::sync::Mutex::new(None),
        };
        let history = log.read_agreed(1, usize::MAX, None).await?;
        let head = history.last().map(LedgerRecord::head);
        *log.committed.write().map_err(|_| LedgerError::poisoned(&log.name))? = head;
        info!(
            ledger = %log.name,
            head = head.map_or(0, |h| h.seq),
            "replicated ledger opened"
        );
        Ok(log)
    }

    /// Number of acks required to commit.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn replicas(&self) -> &[Arc<dyn Replica>] {
        &self.replicas
    }

    fn committed_head(&self) -> Result<Option<ChainHead>> {
        self.committed
            .read()
            .map(|head| *head)
            .map_err(|_| LedgerError::poisoned(&self.name))
    }

    fn commit(&self, record: &LedgerRecord) -> Result<()> {
        *self
            .committed
            .write()
            .map_err(|_| LedgerError::poisoned(&self.name))? = Some(record.head());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replication
    // ─────────────────────────────────────────────────────────────────────────

    /// Offer `record` to every replica, catching up those that lag.
    ///
    /// Returns the number of replicas that now hold it.
    async fn replicate(&self, record: &LedgerRecord) -> usize {
        let mut offers = JoinSet::new();
        for (index, replica) in self.replicas.iter().enumerate() {
            let replica = replica.clone();
            let record = record.clone();
            let budget = self.replica_timeout;
            offers.spawn(async move {
                let outcome = tokio::time::timeout(budget, replica.accept(&record))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LedgerError::Unavailable(format!("{} timed out", replica.name())))
                    });
                (index, outcome)
            });
        }

        let mut acks = 0usize;
        let mut behind = Vec::new();
        while let Some(joined) = offers.join_next().await {
            match joined {
                Ok((_, Ok(_))) => acks += 1,
                Ok((index, Err(LedgerError::Behind { have, .. }))) => behind.push((index, have)),
                Ok((index, Err(LedgerError::Conflict(seq)))) => error!(
                    replica = %self.replicas[index].name(),
                    seq,
                    "replica holds a conflicting record"
                ),
                Ok((index, Err(e))) => warn!(
                    replica = %self.replicas[index].name(),
                    seq = record.seq,
                    error = %e,
                    "replica refused record"
                ),
                Err(e) => warn!(error = %LedgerError::task_failed(e), "replica task failed"),
            }
        }

        if !behind.is_empty() {
            acks += self.catch_up(record, behind).await;
        }
        acks
    }

    /// Bring lagging replicas up to `record`, returning how many made it.
    async fn catch_up(&self, record: &LedgerRecord, behind: Vec<(usize, u64)>) -> usize {
        let lowest = behind.iter().map(|(_, have)| *have).min().unwrap_or(0);
        let gap = (record.seq - 1).saturating_sub(lowest) as usize;
        let missing = match self.read_agreed(lowest + 1, gap, Some(record.seq - 1)).await {
            Ok(missing) if missing.len() == gap => Arc::new(missing),
            Ok(missing) => {
                warn!(wanted = gap, found = missing.len(), "not enough agreed history to catch up");
                return 0;
            }
            Err(e) => {
                warn!(error = %e, "cannot read history to catch up replicas");
                return 0;
            }
        };

        let mut transfers = JoinSet::new();
        for (index, have) in behind {
            let replica = self.replicas[index].clone();
            let missing = missing.clone();
            let record = record.clone();
            let budget = self.replica_timeout;
            transfers.spawn(async move {
                let outcome = tokio::time::timeout(budget, transfer(&replica, &missing, have, &record))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LedgerError::Unavailable(format!("{} timed out", replica.name())))
                    });
                (replica.name().to_string(), have, outcome)
            });
        }

        let mut caught_up = 0;
        while let Some(joined) = transfers.join_next().await {
            match joined {
                Ok((name, have, Ok(_))) => {
                    debug!(replica = %name, from = have, to = record.seq, "replica caught up");
                    caught_up += 1;
                }
                Ok((name, _, Err(e))) => {
                    warn!(replica = %name, error = %e, "replica catch-up failed")
                }
                Err(e) => warn!(error = %LedgerError::task_failed(e), "replica task failed"),
            }
        }
        caught_up
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Read records that a quorum of replicas agree on.
    ///
    /// Stops at the first position without agreement, or past `cap`.
    async fn read_agreed(
        &self,
        from: u64,
        limit: usize,
        cap: Option<u64>,
    ) -> Result<Vec<LedgerRecord>> {
        let from = first_seq(from);
        if limit == 0 || cap.is_some_and(|cap| from > cap) {
            return Ok(Vec::new());
        }
        // Fetch the predecessor too, to anchor the first link.
        let fetch_from = if from > 1 { from - 1 } else { 1 };
        let fetch_limit = if from > 1 { limit.saturating_add(1) } else { limit };

        let mut reads = JoinSet::new();
        for replica in &self.replicas {
            let replica = replica.clone();
            let budget = self.replica_timeout;
            reads.spawn(async move {
                let outcome = tokio::time::timeout(budget, replica.read_range(fetch_from, fetch_limit))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LedgerError::Unavailable(format!("{} timed out", replica.name())))
                    });
                (replica.name().to_string(), outcome)
            });
        }

        let mut copies = Vec::with_capacity(self.replicas.len());
        while let Some(joined) = reads.join_next().await {
            match joined {
                Ok((_, Ok(records))) => copies.push(records),
                Ok((name, Err(e))) => warn!(replica = %name, error = %e, "replica read failed"),
                Err(e) => warn!(error = %LedgerError::task_failed(e), "replica task failed"),
            }
        }
        if copies.len() < self.quorum {
            return Err(LedgerError::Unavailable(format!(
                "{} of {} replicas answered, quorum is {}",
                copies.len(),
                self.replicas.len(),
                self.quorum
            )));
        }

        let mut agreed: Vec<LedgerRecord> = Vec::new();
        for (offset, seq) in (fetch_from..).enumerate() {
            if cap.is_some_and(|cap| seq > cap) {
                break;
            }
            let mut tally: HashMap<Blake3Hash, (usize, &LedgerRecord)> = HashMap::new();
            for record in copies.iter().filter_map(|c| c.get(offset)) {
                if record.seq == seq {
                    tally.entry(record.hash()).or_insert((0, record)).0 += 1;
                }
            }
            match tally.into_values().find(|(votes, _)| *votes >= self.quorum) {
                Some((_, record)) => agreed.push(record.clone()),
                None => break,
            }
        }

        let mut records = agreed.into_iter();
        let mut head = None;
        if from > 1 {
            match records.next() {
                Some(anchor) => head = Some(anchor.head()),
                None => return Ok(Vec::new()),
            }
        }
        let mut out = Vec::new();
        for record in records {
            validate_link(head.as_ref(), &record).map_err(tampered)?;
            head = Some(record.head());
            out.push(record);
        }
        Ok(out)
    }
}

/// Offer a replica the records it is missing, then `record` itself.
async fn transfer(
    replica: &Arc<dyn Replica>,
    missing: &[LedgerRecord],
    have: u64,
    record: &LedgerRecord,
) -> Result<Accepted> {
    for earlier in missing.iter().filter(|r| r.seq > have) {
        replica.accept(earlier).await?;
    }
    replica.accept(record).await
}

#[async_trait]
impl LedgerLog for DistributedConsensusLog {
    fn name(&self) -> &str {
        &self.name
    }

    fn attestor(&self) -> Identity {
        self.attestor.identity()
    }

    async fn append(&self, body: RecordBody) -> Result<LedgerRecord> {
        let mut pending = self.pending.lock().await;

        if let Some(earlier) = pending.clone() {
            let acks = self.replicate(&earlier).await;
            if acks < self.quorum {
                return Err(LedgerError::Unavailable(format!(
                    "seq {} still unconfirmed: {acks} of {} acks",
                    earlier.seq, self.quorum
                )));
            }
            self.commit(&earlier)?;
            *pending = None;
            info!(ledger = %self.name, seq = earlier.seq, acks, "pending record committed");
            return Err(LedgerError::Reconciled { seq: earlier.seq });
        }

        let head = self.committed_head()?;
        let record = self.attestor.attest(head.as_ref(), body);
        let acks = self.replicate(&record).await;
        if acks < self.quorum {
            warn!(ledger = %self.name, seq = record.seq, acks, "record did not reach quorum");
            let seq = record.seq;
            *pending = Some(record);
            return Err(LedgerError::Unavailable(format!(
                "seq {seq} reached {acks} of {} required acks",
                self.quorum
            )));
        }
        self.commit(&record)?;
        debug!(ledger = %self.name, seq = record.seq, acks, "record committed");
        Ok(record)
    }

    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        let cap = self.committed_head()?.map_or(0, |h| h.seq);
        self.read_agreed(from, limit, Some(cap)).await
    }

    async fn head(&self) -> Result<Option<ChainHead>> {
        self.committed_head()
    }

    async fn verify_chain(&self) -> Result<Option<ChainHead>> {
        let committed = self.committed_head()?;
        let cap = committed.map_or(0, |h| h.seq);
        let history = self.read_agreed(1, usize::MAX, Some(cap)).await?;
        let agreed = history.last().map(LedgerRecord::head);
        if agreed != committed {
            return Err(LedgerError::tampered(
                agreed.map_or(0, |h| h.seq) + 1,
                "replicas no longer agree on committed history",
            ));
        }
        Ok(agreed)
    }
}
