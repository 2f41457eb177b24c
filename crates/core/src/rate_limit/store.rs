//! Window marker storage.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, TransactionBehavior};
use thiserror::Error;

use crate::db;

/// Error type for the rate limiter.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Marker storage could not be read or written. Callers treat this as a denial.
    #[error("rate limiter storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for RateLimitError {
    fn from(e: rusqlite::Error) -> Self {
        RateLimitError::Unavailable(e.to_string())
    }
}

/// Result of one evict-count-insert step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A marker was recorded at `now`.
    Recorded,
    /// The window is full; nothing was recorded.
    Full { oldest_ms: i64 },
}

/// Storage for per-key sliding windows.
///
/// `acquire` must evict, count and insert as one atomic step for the key, even
/// when several processes share the storage.
pub trait WindowStore: Send + Sync {
    fn acquire(
        &self,
        key: &str,
        limit: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<Acquire, RateLimitError>;
}

/// Process-local window store.
#[derive(Default)]
pub struct MemoryWindowStore {
    /// `(ts_ms, expires_at_ms)` per key, oldest first.
    windows: Mutex<HashMap<String, VecDeque<(i64, i64)>>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for MemoryWindowStore {
    fn acquire(
        &self,
        key: &str,
        limit: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<Acquire, RateLimitError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::Unavailable("window lock poisoned".to_string()))?;

        // Stale keys clean themselves up. Each marker expires by the window
        // it was recorded under.
        windows.retain(|_, markers| {
            markers.retain(|&(_, expires_at_ms)| expires_at_ms > now_ms);
            !markers.is_empty()
        });

        let markers = windows.entry(key.to_string()).or_default();
        if markers.len() >= limit as usize {
            let oldest_ms = markers.front().map_or(now_ms, |&(ts_ms, _)| ts_ms);
            return Ok(Acquire::Full { oldest_ms });
        }

        markers.push_back((now_ms, now_ms + window_ms));
        Ok(Acquire::Recorded)
    }
}

/// Window store shared across processes through a SQLite table.
pub struct SqliteWindowStore {
    conn: Mutex<Connection>,
}

impl SqliteWindowStore {
    pub fn new(path: &Path) -> Result<Self, RateLimitError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, RateLimitError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RateLimitError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_markers (
                key TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_rate_limit_markers_key ON rate_limit_markers(key, ts_ms);
            CREATE INDEX IF NOT EXISTS idx_rate_limit_markers_expiry ON rate_limit_markers(expires_at_ms);
            "#,
        )?;
        Ok(())
    }
}

impl WindowStore for SqliteWindowStore {
    fn acquire(
        &self,
        key: &str,
        limit: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<Acquire, RateLimitError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| RateLimitError::Unavailable("window lock poisoned".to_string()))?;

        // IMMEDIATE takes the write lock up front, so no other process can
        // insert between our count and our insert.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM rate_limit_markers WHERE expires_at_ms <= ?",
            params![now_ms],
        )?;

        let (count, oldest_ms): (i64, Option<i64>) = tx.query_row(
            "SELECT COUNT(*), MIN(ts_ms) FROM rate_limit_markers WHERE key = ?",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let outcome = if count >= i64::from(limit) {
            Acquire::Full {
                oldest_ms: oldest_ms.unwrap_or(now_ms),
            }
        } else {
            tx.execute(
                "INSERT INTO rate_limit_markers (key, ts_ms, expires_at_ms) VALUES (?, ?, ?)",
                params![key, now_ms, now_ms + window_ms],
            )?;
            Acquire::Recorded
        };

        tx.commit()?;
        Ok(outcome)
    }
}
