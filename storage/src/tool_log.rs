//! Durable per-sequence tool outcome records.
//!
//! One row per (session, sequence number). Sequence numbers are consumed
//! exactly once, so replaying a record after a crash is a no-op rather than
//! a duplicate.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, params};

use tether_types::{SessionId, ToolExecutionResult, ToolUseId};

use crate::error::StorageError;

pub struct ToolEventLog {
    conn: Mutex<Connection>,
}

impl ToolEventLog {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS tool_events (
            session_id TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            tool_use_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            output_json TEXT NOT NULL,
            is_error INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (session_id, sequence_number)
        );
    ";

    /// Open or create the event log at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        Self::initialize(conn)
    }

    /// Open an in-memory log (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection mutex poisoned".into()))
    }

    /// Record one outcome. Replays of an already-recorded sequence number
    /// are ignored.
    pub fn record(
        &self,
        session_id: &SessionId,
        result: &ToolExecutionResult,
    ) -> Result<(), StorageError> {
        let output_json = serde_json::to_string(&result.output)?;
        let created_at = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO tool_events
                 (session_id, sequence_number, tool_use_id, tool_name,
                  output_json, is_error, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id.as_str(),
                result.sequence_number as i64,
                result.tool_use_id.as_str(),
                &result.tool_name,
                output_json,
                i64::from(result.is_error),
                result.duration_ms as i64,
                created_at,
            ],
        )?;
        Ok(())
    }

    /// All recorded outcomes for a session, in sequence order.
    pub fn for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ToolExecutionResult>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sequence_number, tool_use_id, tool_name, output_json, is_error, duration_ms
             FROM tool_events
             WHERE session_id = ?1
             ORDER BY sequence_number",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (sequence_number, tool_use_id, tool_name, output_json, is_error, duration_ms) =
                row?;
            results.push(ToolExecutionResult {
                tool_use_id: ToolUseId::from(tool_use_id),
                tool_name,
                sequence_number: sequence_number as u64,
                output: serde_json::from_str(&output_json)?,
                is_error: is_error != 0,
                duration_ms: duration_ms as u64,
            });
        }
        Ok(results)
    }
}
