//! Durable storage for the runtime.
//!
//! Three pieces share this crate: [`SqliteCheckpointStore`], which persists
//! versioned execution snapshots and their pending writes; [`ToolEventLog`],
//! which keeps a durable per-sequence record of tool outcomes; and
//! [`SqliteBackend`], a SQLite implementation of the counter/lock
//! backing-store contract for single-node deployments. Stored blobs are
//! wrapped in the [`envelope`] format so the codec can change without a
//! schema migration.

mod checkpoint_store;
mod counter;
pub mod envelope;
mod error;
mod tool_log;

pub use checkpoint_store::{ListOptions, SqliteCheckpointStore};
pub use counter::SqliteBackend;
pub use error::StorageError;
pub use tool_log::ToolEventLog;
