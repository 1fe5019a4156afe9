use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// The backing store is unreachable or refused the operation.
///
/// Never silently retried; callers that want retry opt in explicitly
/// (see `LockManager::with_lock`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("backing store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl BackendError {
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Atomic operations the counter/lock backing store must provide.
///
/// Each operation is a single atomic round-trip; composing them never
/// requires holding any client-side state between calls. Implementations
/// over a shared server (Redis `SET NX EX`, Lua compare-and-delete,
/// `INCRBY`) and in-process implementations must behave identically.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Set `key = value` with expiry `ttl` only if the key is absent.
    /// Returns true when the key was set by this call.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError>;

    /// Delete `key` only if its current value equals `expected`.
    /// Returns true when the key was deleted by this call.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, BackendError>;

    /// Advisory existence check. Never used for correctness.
    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Atomically advance the counter at `key` by `count` and return the
    /// first number of the reserved range. A fresh counter starts at zero,
    /// so the first reserved number is 1.
    async fn reserve_range(&self, key: &str, count: u64) -> Result<u64, BackendError>;
}
