use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The database is unreachable or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A duplicate write to a reserved channel. Repeating a special write is
    /// a caller bug, not safe replay.
    #[error("duplicate write: {0}")]
    Conflict(String),

    /// Checkpoint operations address rows by thread; a config without one
    /// cannot be executed.
    #[error("config is missing the mandatory thread_id")]
    MissingThreadId,

    /// `put_writes` must target a specific checkpoint.
    #[error("config names no checkpoint id")]
    MissingCheckpointId,

    /// Stored bytes do not form a valid envelope, or carry an unknown codec
    /// tag.
    #[error("malformed envelope: {0}")]
    Envelope(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

/// True for primary-key / uniqueness violations, the signal `put_writes`
/// turns into [`StorageError::Conflict`] for reserved channels.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
