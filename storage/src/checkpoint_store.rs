//! SQLite checkpoint store.
//!
//! Snapshots land in `checkpoints`, side effects recorded between snapshots
//! land in `writes`, related by a composite foreign key. Snapshots are
//! upserted by caller-assigned id, so a retried `put` is idempotent.
//! "Latest" for a thread/namespace is the highest checkpoint id, which is
//! why callers must assign lexically ordered ids.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use tether_types::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    ERROR_CHANNEL, INTERRUPT_CHANNEL, PendingWrite, TaskId, ThreadId,
};

use crate::envelope;
use crate::error::{StorageError, is_constraint_violation};

/// Reserved channels write at fixed negative indices so a repeat is a
/// primary-key conflict instead of a silent replay.
fn write_idx(channel: &str, position: usize) -> i64 {
    match channel {
        ERROR_CHANNEL => -1,
        INTERRUPT_CHANNEL => -2,
        _ => position as i64,
    }
}

fn require_thread(config: &CheckpointConfig) -> Result<&ThreadId, StorageError> {
    config
        .thread_id
        .as_ref()
        .ok_or(StorageError::MissingThreadId)
}

/// Options for [`SqliteCheckpointStore::list`].
#[derive(Debug, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    /// Excludes checkpoint ids `>=` this boundary.
    pub before: Option<String>,
    /// Metadata key/value equality filter; every entry must match.
    pub filter: Option<Map<String, Value>>,
}

#[derive(Debug)]
struct CheckpointRow {
    checkpoint_id: String,
    parent_checkpoint_id: Option<String>,
    checkpoint: Vec<u8>,
    metadata: Vec<u8>,
}

pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id TEXT NOT NULL,
            checkpoint_ns TEXT NOT NULL DEFAULT '',
            checkpoint_id TEXT NOT NULL,
            parent_checkpoint_id TEXT,
            type TEXT,
            checkpoint BLOB,
            metadata BLOB,
            PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id)
        );

        CREATE TABLE IF NOT EXISTS writes (
            thread_id TEXT NOT NULL,
            checkpoint_ns TEXT NOT NULL DEFAULT '',
            checkpoint_id TEXT NOT NULL,
            task_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            channel TEXT NOT NULL,
            type TEXT,
            value BLOB,
            PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id, task_id, idx),
            FOREIGN KEY (thread_id, checkpoint_ns, checkpoint_id)
                REFERENCES checkpoints (thread_id, checkpoint_ns, checkpoint_id)
        );
    ";

    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
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

    /// Persist a snapshot and return the config addressing it.
    ///
    /// `new_versions` is folded into the stored snapshot's channel versions.
    /// The parent pointer is taken from `config.checkpoint_id`, which is how
    /// history chains: callers pass the config returned by the previous put.
    pub fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
        new_versions: &ChannelVersions,
    ) -> Result<CheckpointConfig, StorageError> {
        let thread_id = require_thread(config)?;

        let mut stored = checkpoint.clone();
        stored
            .channel_versions
            .extend(new_versions.iter().map(|(k, v)| (k.clone(), v.clone())));

        let checkpoint_blob = envelope::encode_json(&stored)?;
        let metadata_blob = envelope::encode_json(metadata)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints
                 (thread_id, checkpoint_ns, checkpoint_id, parent_checkpoint_id,
                  type, checkpoint, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                thread_id.as_str(),
                &config.checkpoint_ns,
                &stored.id,
                config.checkpoint_id.as_deref(),
                envelope::JSON_TAG,
                checkpoint_blob,
                metadata_blob,
            ],
        )?;

        tracing::debug!(
            thread = %thread_id,
            ns = %config.checkpoint_ns,
            checkpoint = %stored.id,
            "stored checkpoint"
        );

        Ok(CheckpointConfig {
            thread_id: Some(thread_id.clone()),
            checkpoint_ns: config.checkpoint_ns.clone(),
            checkpoint_id: Some(stored.id),
        })
    }

    /// Fetch one snapshot with its metadata, parent pointer, and pending
    /// writes. Resolves the exact id when the config names one, otherwise
    /// the latest for the thread/namespace. `Ok(None)` when nothing matches.
    pub fn get_tuple(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<CheckpointTuple>, StorageError> {
        let thread_id = require_thread(config)?;
        let conn = self.conn()?;

        let row = match &config.checkpoint_id {
            Some(id) => conn
                .query_row(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata
                     FROM checkpoints
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3",
                    params![thread_id.as_str(), &config.checkpoint_ns, id],
                    Self::map_row,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata
                     FROM checkpoints
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2
                     ORDER BY checkpoint_id DESC LIMIT 1",
                    params![thread_id.as_str(), &config.checkpoint_ns],
                    Self::map_row,
                )
                .optional()?,
        };

        let Some(row) = row else {
            return Ok(None);
        };

        let pending_writes =
            Self::load_writes(&conn, thread_id, &config.checkpoint_ns, &row.checkpoint_id)?;
        Ok(Some(Self::into_tuple(
            row,
            thread_id,
            &config.checkpoint_ns,
            pending_writes,
        )?))
    }

    /// List snapshots for a thread/namespace, newest first.
    pub fn list(
        &self,
        config: &CheckpointConfig,
        options: &ListOptions,
    ) -> Result<Vec<CheckpointTuple>, StorageError> {
        let thread_id = require_thread(config)?;
        let conn = self.conn()?;

        let rows: Vec<CheckpointRow> = match &options.before {
            Some(boundary) => {
                let mut stmt = conn.prepare(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata
                     FROM checkpoints
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id < ?3
                     ORDER BY checkpoint_id DESC",
                )?;
                let mapped = stmt.query_map(
                    params![thread_id.as_str(), &config.checkpoint_ns, boundary],
                    Self::map_row,
                )?;
                mapped.collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT checkpoint_id, parent_checkpoint_id, checkpoint, metadata
                     FROM checkpoints
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2
                     ORDER BY checkpoint_id DESC",
                )?;
                let mapped = stmt.query_map(
                    params![thread_id.as_str(), &config.checkpoint_ns],
                    Self::map_row,
                )?;
                mapped.collect::<Result<_, _>>()?
            }
        };

        let mut tuples = Vec::new();
        for row in rows {
            if let Some(limit) = options.limit
                && tuples.len() == limit
            {
                break;
            }
            let metadata: CheckpointMetadata = envelope::decode_json(&row.metadata)?;
            if let Some(filter) = &options.filter
                && !metadata.matches(filter)
            {
                continue;
            }
            let pending_writes =
                Self::load_writes(&conn, thread_id, &config.checkpoint_ns, &row.checkpoint_id)?;
            tuples.push(Self::into_tuple(
                row,
                thread_id,
                &config.checkpoint_ns,
                pending_writes,
            )?);
        }
        Ok(tuples)
    }

    /// Record side effects against the checkpoint the config names.
    ///
    /// Ordinary channels replay safely: a duplicate (task, idx) is ignored.
    /// Reserved channels must never repeat, so their duplicate surfaces as
    /// [`StorageError::Conflict`].
    pub fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: &[(String, Value)],
        task_id: &TaskId,
    ) -> Result<(), StorageError> {
        let thread_id = require_thread(config)?;
        let checkpoint_id = config
            .checkpoint_id
            .as_deref()
            .ok_or(StorageError::MissingCheckpointId)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (position, (channel, value)) in writes.iter().enumerate() {
            let idx = write_idx(channel, position);
            let special = idx < 0;
            let blob = envelope::encode_json(value)?;
            let sql = if special {
                "INSERT INTO writes
                     (thread_id, checkpoint_ns, checkpoint_id, task_id, idx, channel, type, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            } else {
                "INSERT OR IGNORE INTO writes
                     (thread_id, checkpoint_ns, checkpoint_id, task_id, idx, channel, type, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            };
            let result = tx.execute(
                sql,
                params![
                    thread_id.as_str(),
                    &config.checkpoint_ns,
                    checkpoint_id,
                    task_id.as_str(),
                    idx,
                    channel,
                    envelope::JSON_TAG,
                    blob,
                ],
            );
            if let Err(e) = result {
                if special && is_constraint_violation(&e) {
                    return Err(StorageError::Conflict(format!(
                        "repeated write to reserved channel '{channel}' for task {task_id}"
                    )));
                }
                return Err(e.into());
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove every trace of a thread: writes first, then checkpoints, in
    /// one transaction, honoring the foreign key.
    pub fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM writes WHERE thread_id = ?1",
            params![thread_id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM checkpoints WHERE thread_id = ?1",
            params![thread_id.as_str()],
        )?;
        tx.commit()?;
        tracing::debug!(thread = %thread_id, "deleted thread");
        Ok(())
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckpointRow> {
        Ok(CheckpointRow {
            checkpoint_id: row.get(0)?,
            parent_checkpoint_id: row.get(1)?,
            checkpoint: row.get(2)?,
            metadata: row.get(3)?,
        })
    }

    fn load_writes(
        conn: &Connection,
        thread_id: &ThreadId,
        ns: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<PendingWrite>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT task_id, channel, value FROM writes
             WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3
             ORDER BY task_id, idx",
        )?;
        let rows = stmt.query_map(params![thread_id.as_str(), ns, checkpoint_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut writes = Vec::new();
        for row in rows {
            let (task_id, channel, blob) = row?;
            writes.push(PendingWrite {
                task_id: TaskId::from(task_id),
                channel,
                value: envelope::decode_json(&blob)?,
            });
        }
        Ok(writes)
    }

    fn into_tuple(
        row: CheckpointRow,
        thread_id: &ThreadId,
        ns: &str,
        pending_writes: Vec<PendingWrite>,
    ) -> Result<CheckpointTuple, StorageError> {
        let checkpoint: Checkpoint = envelope::decode_json(&row.checkpoint)?;
        let metadata: CheckpointMetadata = envelope::decode_json(&row.metadata)?;
        let parent_config = row.parent_checkpoint_id.map(|parent| CheckpointConfig {
            thread_id: Some(thread_id.clone()),
            checkpoint_ns: ns.to_string(),
            checkpoint_id: Some(parent),
        });
        Ok(CheckpointTuple {
            config: CheckpointConfig {
                thread_id: Some(thread_id.clone()),
                checkpoint_ns: ns.to_string(),
                checkpoint_id: Some(row.checkpoint_id),
            },
            checkpoint,
            metadata,
            parent_config,
            pending_writes,
        })
    }
}
