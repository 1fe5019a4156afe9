use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::kv::{BackendError, KeyValueBackend};

/// Longest backoff between acquisition attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Down-jitter factor: each delay is multiplied by a random value in
/// [1 - JITTER_FACTOR, 1.0] to decorrelate competing acquirers.
const JITTER_FACTOR: f64 = 0.25;

#[derive(Debug, Error)]
pub enum LockError {
    /// Surfaced only when `throw_on_failure` was requested.
    #[error("lock '{key}' not acquired")]
    NotAcquired { key: String },

    #[error("lock store unreachable: {0}")]
    Storage(#[from] BackendError),
}

/// Proof of one acquisition. A fresh token is minted per acquire, so a
/// holder whose TTL expired can never release the lock out from under the
/// next holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Options for [`LockManager::with_lock`].
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Rounded up to whole seconds, minimum one second.
    pub ttl: Duration,
    /// Whether to retry acquisition at all.
    pub retry: bool,
    /// Retries after the initial attempt (so `3` means up to 4 attempts).
    pub max_retries: u32,
    /// Initial backoff delay; doubles per attempt up to an internal cap.
    pub retry_delay: Duration,
    /// When true, a failed acquisition is an error instead of
    /// [`LockOutcome::NotAcquired`].
    pub throw_on_failure: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(150),
            throw_on_failure: false,
        }
    }
}

/// Result of a `with_lock` call when acquisition failure is not an error.
#[derive(Debug)]
pub enum LockOutcome<T> {
    Completed(T),
    NotAcquired,
}

impl<T> LockOutcome<T> {
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            LockOutcome::Completed(value) => Some(value),
            LockOutcome::NotAcquired => None,
        }
    }

    #[must_use]
    pub fn is_not_acquired(&self) -> bool {
        matches!(self, LockOutcome::NotAcquired)
    }
}

/// Round a TTL up to whole seconds, minimum one second.
fn round_up_ttl(ttl: Duration) -> Duration {
    let mut secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs += 1;
    }
    Duration::from_secs(secs.max(1))
}

/// Backoff before retry `step` (0-based), capped and down-jittered.
fn backoff_delay(step: u32, initial: Duration) -> Duration {
    let base = initial.as_secs_f64() * 2.0_f64.powi(step as i32);
    let capped = base.min(MAX_RETRY_DELAY.as_secs_f64());
    let jitter = 1.0 - rand::random::<f64>() * JITTER_FACTOR;
    Duration::from_secs_f64(capped * jitter)
}

/// Advisory distributed mutual exclusion over the backing store.
///
/// Advisory, not fenced: nothing prevents a caller from touching the
/// protected resource without acquiring; every caller must opt in
/// uniformly. Safety of release rests entirely on token comparison.
pub struct LockManager {
    backend: Arc<dyn KeyValueBackend>,
}

impl LockManager {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Single atomic set-if-absent-with-expiry attempt. Never blocks waiting
    /// for the current holder.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, LockError> {
        let token = LockToken::mint();
        let acquired = self
            .backend
            .set_nx_ex(key, token.as_str(), round_up_ttl(ttl))
            .await?;
        Ok(acquired.then_some(token))
    }

    /// Atomic compare-and-delete. True only when `token` still matches the
    /// stored value; a lock re-granted after TTL expiry is left untouched.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError> {
        Ok(self.backend.compare_and_delete(key, token.as_str()).await?)
    }

    /// Advisory existence check only; never used for correctness.
    pub async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.backend.exists(key).await?)
    }

    /// Acquire (with bounded exponential backoff), run `f`, release on every
    /// exit path, and return `f`'s output.
    ///
    /// Release is attempted exactly once per successful acquisition; a
    /// release failure is logged rather than masking `f`'s result, with TTL
    /// expiry as the backstop.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        options: &LockOptions,
        f: F,
    ) -> Result<LockOutcome<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let retries = if options.retry { options.max_retries } else { 0 };

        let mut token = self.acquire(key, options.ttl).await?;
        let mut step = 0;
        while token.is_none() && step < retries {
            let delay = backoff_delay(step, options.retry_delay);
            tracing::debug!(key, step, delay_ms = delay.as_millis() as u64, "lock busy, backing off");
            tokio::time::sleep(delay).await;
            token = self.acquire(key, options.ttl).await?;
            step += 1;
        }

        let Some(token) = token else {
            if options.throw_on_failure {
                return Err(LockError::NotAcquired {
                    key: key.to_string(),
                });
            }
            return Ok(LockOutcome::NotAcquired);
        };

        let result = f().await;

        match self.release(key, &token).await {
            Ok(true) => {}
            Ok(false) => {
                // TTL expired mid-section and the lock may have moved on.
                tracing::warn!(key, "lock token no longer current at release");
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "lock release failed; TTL will reclaim");
            }
        }

        Ok(LockOutcome::Completed(result))
    }
}
