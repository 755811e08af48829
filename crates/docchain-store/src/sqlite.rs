//! SQLite implementation of the BlockStore trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use docchain_core::{Cid, Clock, SystemClock};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::BlockStore;

/// SQLite-based block store.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteBlockStore {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlockStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = format!("sqlite:{}", path.display());
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let mut conn = Connection::open(path)?;
            migration::migrate(&mut conn, SystemClock.now_millis())?;
            Ok(conn)
        })
        .await
        .map_err(StoreError::task_failed)??;
        Ok(Self {
            name,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn, SystemClock.now_millis())?;
        Ok(Self {
            name: "sqlite::memory:".into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::poisoned("sqlite connection"))?;
            f(&conn)
        })
        .await
        .map_err(StoreError::task_failed)?
    }
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_block(&self, cid: &Cid, data: Bytes) -> Result<bool> {
        let cid = *cid;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO blocks (cid, codec, data, stored_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    cid.to_bytes().as_slice(),
                    cid.codec().to_u8() as i64,
                    data.as_ref(),
                    SystemClock.now_millis(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn get_block(&self, cid: &Cid) -> Result<Option<Bytes>> {
        let cid = *cid;
        self.with_conn(move |conn| {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM blocks WHERE cid = ?1",
                    params![cid.to_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.map(Bytes::from))
        })
        .await
    }

    async fn has_block(&self, cid: &Cid) -> Result<bool> {
        let cid = *cid;
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blocks WHERE cid = ?1",
                    params![cid.to_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn block_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchain_core::Codec;

    #[tokio::test]
    async fn test_put_and_get_block() {
        let store = SqliteBlockStore::open_memory().unwrap();
        let cid = Cid::of(Codec::Raw, b"hello");

        assert!(store.put_block(&cid, Bytes::from_static(b"hello")).await.unwrap());
        assert!(store.has_block(&cid).await.unwrap());
        assert_eq!(
            store.get_block(&cid).await.unwrap().unwrap(),
            Bytes::from_static(b"hello")
        );
    }

    #[tokio::test]
    async fn test_idempotent_put_never_overwrites() {
        let store = SqliteBlockStore::open_memory().unwrap();
        let cid = Cid::of(Codec::Raw, b"hello");

        assert!(store.put_block(&cid, Bytes::from_static(b"hello")).await.unwrap());
        assert!(!store.put_block(&cid, Bytes::from_static(b"evil")).await.unwrap());
        assert_eq!(
            store.get_block(&cid).await.unwrap().unwrap(),
            Bytes::from_static(b"hello")
        );
        assert_eq!(store.block_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_block() {
        let store = SqliteBlockStore::open_memory().unwrap();
        let cid = Cid::of(Codec::Raw, b"nothing");
        assert!(store.get_block(&cid).await.unwrap().is_none());
        assert!(!store.has_block(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("blocks.db");
        assert!(matches!(
            SqliteBlockStore::open(&path).await,
            Err(StoreError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.db");
        let cid = Cid::of(Codec::Raw, b"durable");

        {
            let store = SqliteBlockStore::open(&path).await.unwrap();
            store.put_block(&cid, Bytes::from_static(b"durable")).await.unwrap();
        }

        let store = SqliteBlockStore::open(&path).await.unwrap();
        assert_eq!(
            store.get_block(&cid).await.unwrap().unwrap(),
            Bytes::from_static(b"durable")
        );
    }
}
