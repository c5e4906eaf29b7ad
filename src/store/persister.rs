//! Dedup-safe order store. Rows are keyed by order hash; writing a hash that
//! already exists is a silent no-op.

use crate::orders::record::PersistableRecord;
use anyhow::{Context, Result};
use chrono::SecondsFormat;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type UpsertFuture<'a> = BoxFuture<'a, Result<Vec<String>>>;

pub trait Persister: Send + Sync {
    /// Inserts records whose hash is not yet stored and returns the hashes
    /// that were new. Empty input is a no-op.
    fn upsert<'a>(&'a self, records: &'a [PersistableRecord]) -> UpsertFuture<'a>;
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS orders (
    hash TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    maker TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL,
    source TEXT NOT NULL,
    inserted_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_orders_target_created
    ON orders(target, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_orders_maker
    ON orders(maker);
"#;

const INSERT_SQL: &str = "INSERT INTO orders (hash, target, maker, created_at, data, source) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT(hash) DO NOTHING";

/// A stored order row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOrder {
    pub hash: String,
    pub target: String,
    pub maker: String,
    pub created_at: String,
    pub data: String,
    pub source: String,
}

#[derive(Clone)]
pub struct SqlitePersister {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersister {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("failed to open order store at {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed to set order store busy timeout")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory order store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply order store schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get(&self, hash: &str) -> Result<Option<StoredOrder>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT hash, target, maker, created_at, data, source FROM orders WHERE hash = ?1",
        )?;
        let row = stmt
            .query_row(params![hash.to_ascii_lowercase()], |row| {
                Ok(StoredOrder {
                    hash: row.get(0)?,
                    target: row.get(1)?,
                    maker: row.get(2)?,
                    created_at: row.get(3)?,
                    data: row.get(4)?,
                    source: row.get(5)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// All stored hashes, newest listing first.
    pub fn hashes(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT hash FROM orders ORDER BY created_at DESC, hash")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(Into::into)
    }
}

fn insert_batch(conn: &mut Connection, records: &[PersistableRecord]) -> Result<Vec<String>> {
    let tx = conn.transaction()?;
    let mut inserted = Vec::new();
    {
        let mut stmt = tx.prepare_cached(INSERT_SQL)?;
        for record in records {
            let data = record.raw_json()?;
            let changed = stmt.execute(params![
                record.hash,
                record.target_contract,
                record.maker,
                record
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
                data,
                record.source.as_str(),
            ])?;
            if changed > 0 {
                inserted.push(record.hash.clone());
            }
        }
    }
    tx.commit().context("failed to commit order batch")?;
    Ok(inserted)
}

impl Persister for SqlitePersister {
    fn upsert<'a>(&'a self, records: &'a [PersistableRecord]) -> UpsertFuture<'a> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(Vec::new());
            }

            let conn = Arc::clone(&self.conn);
            let batch = records.to_vec();
            let inserted = tokio::task::spawn_blocking(move || {
                let mut guard = conn.lock();
                insert_batch(&mut guard, &batch)
            })
            .await
            .context("order insert task failed")??;

            tracing::debug!(
                attempted = records.len(),
                inserted = inserted.len(),
                "order batch persisted"
            );
            Ok(inserted)
        })
    }
}
