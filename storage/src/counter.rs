//! SQLite implementation of the counter/lock backing-store contract.
//!
//! Single-node deployments that already carry the checkpoint database can
//! use it for sequence counters and locks too, instead of running a shared
//! key-value server. Counters live one row per key, advanced inside a
//! transaction; lock rows carry an absolute expiry and expired rows are
//! treated as absent.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use tether_backend::{BackendError, KeyValueBackend};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS locks (
            key TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0
        );
    ";

    /// Open or create the backing database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Self::initialize(conn)
    }

    /// Open an in-memory backend (for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        conn.execute_batch(Self::SCHEMA)
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BackendError> {
        self.conn
            .lock()
            .map_err(|_| BackendError::unavailable("connection mutex poisoned"))
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl KeyValueBackend for SqliteBackend {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError> {
        let now = Self::now_millis();
        let expires_at = now + ttl.as_millis() as i64;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        tx.execute(
            "DELETE FROM locks WHERE key = ?1 AND expires_at <= ?2",
            params![key, now],
        )
        .map_err(|e| BackendError::unavailable(e.to_string()))?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO locks (key, token, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        tx.commit()
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Ok(inserted == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, BackendError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM locks WHERE key = ?1 AND token = ?2 AND expires_at > ?3",
                params![key, expected, Self::now_millis()],
            )
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Ok(deleted == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM locks WHERE key = ?1 AND expires_at > ?2",
                params![key, Self::now_millis()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn reserve_range(&self, key: &str, count: u64) -> Result<u64, BackendError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        tx.execute(
            "INSERT OR IGNORE INTO counters (key, value) VALUES (?1, 0)",
            params![key],
        )
        .map_err(|e| BackendError::unavailable(e.to_string()))?;
        let current: i64 = tx
            .query_row(
                "SELECT value FROM counters WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        tx.execute(
            "UPDATE counters SET value = value + ?1 WHERE key = ?2",
            params![count as i64, key],
        )
        .map_err(|e| BackendError::unavailable(e.to_string()))?;
        tx.commit()
            .map_err(|e| BackendError::unavailable(e.to_string()))?;
        Ok(current as u64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteBackend;
    use std::time::Duration;
    use tether_backend::KeyValueBackend;

    #[tokio::test]
    async fn counter_ranges_are_disjoint_and_contiguous() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert_eq!(backend.reserve_range("seq:a", 3).await.unwrap(), 1);
        assert_eq!(backend.reserve_range("seq:a", 2).await.unwrap(), 4);
        assert_eq!(backend.reserve_range("seq:b", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lock_rows_honor_set_nx_and_compare_delete() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert!(
            backend
                .set_nx_ex("k", "tok", Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(
            !backend
                .set_nx_ex("k", "other", Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(backend.exists("k").await.unwrap());

        assert!(!backend.compare_and_delete("k", "wrong").await.unwrap());
        assert!(backend.compare_and_delete("k", "tok").await.unwrap());
        assert!(!backend.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_row_is_reclaimed() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .set_nx_ex("k", "a", Duration::from_millis(0))
            .await
            .unwrap();
        assert!(!backend.exists("k").await.unwrap());
        assert!(
            backend
                .set_nx_ex("k", "b", Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn counters_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            assert_eq!(backend.reserve_range("seq:a", 5).await.unwrap(), 1);
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.reserve_range("seq:a", 1).await.unwrap(), 6);
    }
}
