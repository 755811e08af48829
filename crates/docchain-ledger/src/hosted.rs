//! Hosted ledger backed by SQLite.
//!
//! Records live in a relational table, but the chain rules are the same as
//! for the file log: every insert must extend the head, and every read
//! re-validates hashes, links and attestations, so a row edited behind the
//! ledger's back is detected rather than trusted.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use docchain_core::{
    validate_chain, validate_link, Blake3Hash, ChainHead, Identity, LedgerRecord, RecordBody,
};

use crate::error::{LedgerError, Result};
use crate::log::{check_offer, first_seq, tampered, Accepted, Attestor, LedgerLog, Replica};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A ledger log stored in SQLite.
pub struct HostedLedger {
    name: String,
    attestor: Attestor,
    state: Arc<Mutex<HostedState>>,
}

struct HostedState {
    conn: Connection,
    head: Option<ChainHead>,
}

impl HostedLedger {
    /// Open a SQLite database at the given path, validating the stored chain.
    pub async fn open(path: impl AsRef<Path>, attestor: Attestor) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let name = format!("hosted:{}", path.display());
            let conn = Connection::open(&path)?;
            Self::from_connection(name, conn, attestor)
        })
        .await
        .map_err(LedgerError::task_failed)?
    }

    /// Open an in-memory database.
    ///
    /// Useful for testing.
    pub fn open_memory(attestor: Attestor) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection("hosted::memory:".into(), conn, attestor)
    }

    fn from_connection(name: String, mut conn: Connection, attestor: Attestor) -> Result<Self> {
        migrate(&mut conn, attestor.now_millis())?;
        let records = select_range(&conn, 1, i64::MAX)?;
        let head = validate_chain(records.iter()).map_err(tampered)?;
        info!(ledger = %name, records = records.len(), "hosted ledger opened");
        Ok(Self {
            name,
            attestor,
            state: Arc::new(Mutex::new(HostedState { conn, head })),
        })
    }

    async fn with_state<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut HostedState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut state = state.lock().map_err(|_| LedgerError::poisoned("hosted ledger"))?;
            f(&mut state)
        })
        .await
        .map_err(LedgerError::task_failed)?
    }

    /// Direct access to the underlying connection. Test hook for tampering.
    #[cfg(test)]
    fn raw<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(&state.conn)
    }
}

impl HostedState {
    fn insert(&mut self, record: &LedgerRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ledger_records (seq, record_hash, prev_hash, timestamp, kind, cid, bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.seq as i64,
                record.hash().as_bytes().as_slice(),
                record.prev_hash.as_bytes().as_slice(),
                record.timestamp,
                record.body.kind().to_u8() as i64,
                record.body.cid().to_bytes().as_slice(),
                record.encode(),
            ],
        )?;
        self.head = Some(record.head());
        Ok(())
    }

    fn hash_at(&self, seq: u64) -> Result<Option<Blake3Hash>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT record_hash FROM ledger_records WHERE seq = ?1",
                params![seq as i64],
                |row| row.get(0),
            )
            .optional()?;
        bytes
            .map(|b| {
                <[u8; 32]>::try_from(b.as_slice())
                    .map(Blake3Hash::from_bytes)
                    .map_err(|_| LedgerError::tampered(seq, "malformed record_hash column"))
            })
            .transpose()
    }

    fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        let from = first_seq(from);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = select_range(&self.conn, from, limit)?;

        // Anchor the first record to its stored predecessor, then walk the links.
        let mut head = if from > 1 {
            let anchor: Option<Vec<u8>> = self
                .conn
                .query_row(
                    "SELECT bytes FROM ledger_records WHERE seq = ?1",
                    params![(from - 1) as i64],
                    |row| row.get(0),
                )
                .optional()?;
            match anchor {
                Some(bytes) => {
                    let previous = LedgerRecord::decode(&bytes)
                        .map_err(|e| LedgerError::tampered(from - 1, e.to_string()))?;
                    Some(previous.head())
                }
                None => return Ok(Vec::new()),
            }
        } else {
            None
        };
        for record in &records {
            validate_link(head.as_ref(), record).map_err(tampered)?;
            head = Some(record.head());
        }
        Ok(records)
    }

    fn verify(&self) -> Result<Option<ChainHead>> {
        let records = select_range(&self.conn, 1, i64::MAX)?;
        let head = validate_chain(records.iter()).map_err(tampered)?;
        if head != self.head {
            let seq = head.map_or(0, |h| h.seq);
            return Err(LedgerError::tampered(seq, "table no longer matches the committed head"));
        }
        Ok(head)
    }
}

/// Load and decode a range of records, checking each against its stored hash.
fn select_range(conn: &Connection, from: u64, limit: i64) -> Result<Vec<LedgerRecord>> {
    let mut stmt = conn.prepare(
        "SELECT seq, record_hash, bytes FROM ledger_records
         WHERE seq >= ?1 ORDER BY seq LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![from as i64, limit], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, Vec<u8>>(2)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (seq, stored_hash, bytes) = row?;
        let seq = seq as u64;
        let record = LedgerRecord::decode(&bytes)
            .map_err(|e| LedgerError::tampered(seq, e.to_string()))?;
        if record.seq != seq || record.hash().as_bytes().as_slice() != stored_hash.as_slice() {
            return Err(LedgerError::tampered(seq, "row does not match its record"));
        }
        records.push(record);
    }
    Ok(records)
}

fn migrate(conn: &mut Connection, now: i64) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;
    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM ledger_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < SCHEMA_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=SCHEMA_VERSION {
            match version {
                1 => tx.execute_batch(
                    r#"
                    CREATE TABLE ledger_records (
                        seq INTEGER PRIMARY KEY,      -- 1-based, contiguous
                        record_hash BLOB NOT NULL,    -- 32 bytes
                        prev_hash BLOB NOT NULL,      -- 32 bytes, zero for seq 1
                        timestamp INTEGER NOT NULL,   -- ledger time (Unix ms)
                        kind INTEGER NOT NULL,        -- RecordKind
                        cid BLOB NOT NULL,            -- 36 bytes, binary CID
                        bytes BLOB NOT NULL           -- canonical record encoding
                    );
                    CREATE INDEX idx_ledger_records_cid ON ledger_records(cid);
                    "#,
                )?,
                _ => {
                    return Err(LedgerError::Config(format!(
                        "unknown ledger schema version: {version}"
                    )))
                }
            }
            tx.execute(
                "INSERT INTO ledger_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, now],
            )?;
        }
        tx.commit()?;
    }
    Ok(())
}

#[async_trait]
impl LedgerLog for HostedLedger {
    fn name(&self) -> &str {
        &self.name
    }

    fn attestor(&self) -> Identity {
        self.attestor.identity()
    }

    async fn append(&self, body: RecordBody) -> Result<LedgerRecord> {
        let attestor = self.attestor.clone();
        self.with_state(move |state| {
            let record = attestor.attest(state.head.as_ref(), body);
            state.insert(&record)?;
            Ok(record)
        })
        .await
    }

    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        self.with_state(move |state| state.read_range(from, limit)).await
    }

    async fn head(&self) -> Result<Option<ChainHead>> {
        self.with_state(|state| Ok(state.head)).await
    }

    async fn verify_chain(&self) -> Result<Option<ChainHead>> {
        self.with_state(|state| state.verify()).await
    }
}

#[async_trait]
impl Replica for HostedLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&self, record: &LedgerRecord) -> Result<Accepted> {
        let record = record.clone();
        self.with_state(move |state| {
            let outcome = check_offer(state.head.as_ref(), &record, |seq| state.hash_at(seq))?;
            if outcome == Accepted::Appended {
                state.insert(&record)?;
            }
            Ok(outcome)
        })
        .await
    }

    async fn read_range(&self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        self.with_state(move |state| state.read_range(from, limit)).await
    }

    async fn head(&self) -> Result<Option<ChainHead>> {
        self.with_state(|state| Ok(state.head)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchain_core::{Cid, Codec, Keypair, ManualClock, Metadata};

    fn attestor() -> Attestor {
        Attestor::new(Keypair::from_seed(&[6; 32]), Arc::new(ManualClock::new(42)))
    }

    fn body(n: u8) -> RecordBody {
        RecordBody::Register {
            cid: Cid::of(Codec::Raw, &[n]),
            owner: Keypair::from_seed(&[n; 32]).identity(),
            metadata: Metadata::new(format!("doc {n}")),
        }
    }

    #[tokio::test]
    async fn test_append_read_verify() {
        let ledger = HostedLedger::open_memory(attestor()).unwrap();
        for n in 1..=4 {
            ledger.append(body(n)).await.unwrap();
        }
        let tail = LedgerLog::read_range(&ledger, 3, 10).await.unwrap();
        assert_eq!(tail.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3, 4]);
        let head = ledger.verify_chain().await.unwrap().unwrap();
        assert_eq!(head.seq, 4);
    }

    #[tokio::test]
    async fn test_reopen_validates_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = HostedLedger::open(&path, attestor()).await.unwrap();
            ledger.append(body(1)).await.unwrap();
            ledger.append(body(2)).await.unwrap();
        }
        let ledger = HostedLedger::open(&path, attestor()).await.unwrap();
        assert_eq!(LedgerLog::head(&ledger).await.unwrap().unwrap().seq, 2);
        assert_eq!(ledger.append(body(3)).await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn test_edited_row_is_detected() {
        let ledger = HostedLedger::open_memory(attestor()).unwrap();
        ledger.append(body(1)).await.unwrap();
        ledger.append(body(2)).await.unwrap();

        // Swap record 2's bytes for a differently-attested record with a matching hash column.
        let forged = Attestor::new(Keypair::from_seed(&[0xee; 32]), Arc::new(ManualClock::new(42)));
        let first = ledger.record(1).await.unwrap();
        let fake = forged.attest(Some(&first.head()), body(9));
        ledger.raw(|conn| {
            conn.execute(
                "UPDATE ledger_records SET bytes = ?1, record_hash = ?2 WHERE seq = 2",
                params![fake.encode(), fake.hash().as_bytes().as_slice()],
            )
            .unwrap();
        });

        // The forgery links correctly and is validly signed, but the head no longer matches.
        assert!(matches!(
            ledger.verify_chain().await,
            Err(LedgerError::Tampered { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_row_fails_read() {
        let ledger = HostedLedger::open_memory(attestor()).unwrap();
        ledger.append(body(1)).await.unwrap();
        ledger.raw(|conn| {
            conn.execute(
                "UPDATE ledger_records SET record_hash = zeroblob(32) WHERE seq = 1",
                [],
            )
            .unwrap();
        });
        assert!(matches!(
            LedgerLog::read_range(&ledger, 1, 1).await,
            Err(LedgerError::Tampered { seq: 1, .. })
        ));
    }
}
