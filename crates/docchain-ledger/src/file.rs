//! Append-only file log.
//!
//! The file is a sequence of frames:
//!
//! ```text
//! u32 big-endian length || canonical record bytes
//! ```
//!
//! Each record carries the hash of its predecessor, so the file is
//! tamper-evident on its own. On open the whole file is replayed and every
//! link validated. A final frame cut short by a crash is truncated away; any
//! other damage is reported as `Tampered`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docchain_core::{
    is_truncated, validate_link, Blake3Hash, ChainHead, Identity, LedgerRecord, RecordBody,
};
use tracing::{info, warn};

use crate::error::{LedgerError, Result};
use crate::log::{check_offer, first_seq, tampered, Accepted, Attestor, LedgerLog, Replica};

/// Largest frame accepted on read.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// File log options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLogOptions {
    /// fsync after every append.
    pub fsync: bool,
}

impl Default for FileLogOptions {
    fn default() -> Self {
        Self { fsync: true }
    }
}

/// A ledger log backed by a single append-only file.
pub struct LocalFileLog {
    name: String,
    attestor: Attestor,
    options: FileLogOptions,
    state: Arc<Mutex<FileState>>,
}

struct FileState {
    path: PathBuf,
    file: File,
    /// Byte offset of each frame; index `seq - 1`.
    offsets: Vec<u64>,
    /// Record hash of each frame; index `seq - 1`.
    hashes: Vec<Blake3Hash>,
    head: Option<ChainHead>,
    len: u64,
}

impl LocalFileLog {
    /// Open (or create) a log file, validating every record in it.
    pub async fn open(
        path: impl AsRef<Path>,
        attestor: Attestor,
        options: FileLogOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = format!("file:{}", path.display());
        let state = tokio::task::spawn_blocking(move || FileState::open(path))
            .await
            .map_err(LedgerError::task_failed)??;
        Ok(Self {
            name,
            attestor,
            options,
            state: Arc::new(Mutex::new(state)),
        })
    }

    async fn with_state<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut FileState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut state = state.lock().map_err(|_| LedgerError::poisoned("file log"))?;
            f(&mut state)
        })
        .await
        .map_err(LedgerError::task_failed)?
    }
}

impl FileState {
    fn open(path: PathBuf) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut offsets = Vec::new();
        let mut hashes = Vec::new();
        let mut head: Option<ChainHead> = None;
        let mut pos = 0usize;

        while pos < bytes.len() {
            let seq = offsets.len() as u64 + 1;
            let Some(frame) = read_frame(&bytes[pos..], seq)? else {
                // Only the last write can be torn, and it leaves a strict
                // prefix of one record. A complete record behind an oversized
                // length means the length itself was damaged.
                if bytes.len() - pos >= 4 && !is_truncated(&bytes[pos + 4..]) {
                    return Err(LedgerError::tampered(
                        seq,
                        "frame length runs past the end of the log",
                    ));
                }
                warn!(
                    path = %path.display(),
                    offset = pos,
                    dropped = bytes.len() - pos,
                    "truncating torn final frame"
                );
                file.set_len(pos as u64)?;
                file.sync_all()?;
                break;
            };

            let record = LedgerRecord::decode(frame)
                .map_err(|e| LedgerError::tampered(seq, e.to_string()))?;
            validate_link(head.as_ref(), &record).map_err(tampered)?;

            offsets.push(pos as u64);
            hashes.push(record.hash());
            head = Some(record.head());
            pos += 4 + frame.len();
        }

        let len = pos as u64;
        info!(path = %path.display(), records = offsets.len(), "file log opened");
        Ok(Self {
            path,
            file,
            offsets,
            hashes,
            head,
            len,
        })
    }

    fn write_record(&mut self, record: &LedgerRecord, fsync: bool) -> Result<()> {
        let encoded = record.encode();
        let mut frame = Vec::with_capacity(4 + encoded.len());
        frame.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        frame.extend_from_slice(&encoded);

        let written = self.file.write_all(&frame).and_then(|()| {
            if fsync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // Leave no partial frame behind; a failure here is caught on the next open.
            let _ = self.file.set_len(self.len);
            return Err(e.into());
        }

        self.offsets.push(self.len);
        self.hashes.push(record.hash());
        self.head = Some(record.head());
        self.len += frame.len() as u64;
        Ok(())
    }

    fn read_range(&mut self, from: u64, limit: usize) -> Result<Vec<LedgerRecord>> {
        let start = (first_seq(from) - 1) as usize;
        if start >= self.offsets.len() || limit == 0 {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(limit).min(self.offsets.len());
        let begin = self.offsets[start];
        let stop = self.offsets.get(end).copied().unwrap_or(self.len);

        let mut bytes = vec![0u8; (stop - begin) as usize];
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(begin))?;
        reader.read_exact(&mut bytes)?;

        let mut records = Vec::with_capacity(end - start);
        let mut pos = 0usize;
        for index in start..end {
            let seq = index as u64 + 1;
            let frame = read_frame(&bytes[pos..], seq)?
                .ok_or_else(|| LedgerError::tampered(seq, "frame truncated after open"))?;
            let record = LedgerRecord::decode(frame)
                .map_err(|e| LedgerError::tampered(seq, e.to_string()))?;
            if record.seq != seq || record.hash() != self.hashes[index] {
                return Err(LedgerError::tampered(seq, "record changed on disk"));
            }
            records.push(record);
            pos += 4 + frame.len();
        }
        Ok(records)
    }

    fn verify(&self) -> Result<Option<ChainHead>> {
        let mut bytes = Vec::new();
        File::open(&self.path)?.read_to_end(&mut bytes)?;

        let mut head: Option<ChainHead> = None;
        let mut pos = 0usize;
        while pos < bytes.len() {
            let seq = head.map_or(1, |h| h.seq + 1);
            let frame = read_frame(&bytes[pos..], seq)?
                .ok_or_else(|| LedgerError::tampered(seq, "truncated frame"))?;
            let record = LedgerRecord::decode(frame)
                .map_err(|e| LedgerError::tampered(seq, e.to_string()))?;
            validate_link(head.as_ref(), &record).map_err(tampered)?;
            head = Some(record.head());
            pos += 4 + frame.len();
        }

        if head != self.head {
            let seq = head.map_or(0, |h| h.seq);
            return Err(LedgerError::tampered(seq, "file no longer matches the committed head"));
        }
        Ok(head)
    }
}

/// Split one frame off the front of `bytes`.
///
/// Returns `None` if the frame is incomplete (a torn write).
fn read_frame(bytes: &[u8], seq: u64) -> Result<Option<&[u8]>> {
    if bytes.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(LedgerError::tampered(seq, format!("invalid frame length {len}")));
    }
    let end = 4 + len as usize;
    if bytes.len() < end {
        return Ok(None);
    }
    Ok(Some(&bytes[4..end]))
}

#[async_trait]
impl LedgerLog for LocalFileLog {
    fn name(&self) -> &str {
        &self.name
    }

    fn attestor(&self) -> Identity {
        self.attestor.identity()
    }

    async fn append(&self, body: RecordBody) -> Result<LedgerRecord> {
        let attestor = self.attestor.clone();
        let fsync = self.options.fsync;
        self.with_state(move |state| {
            let record = attestor.attest(state.head.as_ref(), body);
            state.write_record(&record, fsync)?;
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
impl Replica for LocalFileLog {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&self, record: &LedgerRecord) -> Result<Accepted> {
        let record = record.clone();
        let fsync = self.options.fsync;
        self.with_state(move |state| {
            let outcome = check_offer(state.head.as_ref(), &record, |seq| {
                Ok(state.hashes.get(seq as usize - 1).copied())
            })?;
            if outcome == Accepted::Appended {
                state.write_record(&record, fsync)?;
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
