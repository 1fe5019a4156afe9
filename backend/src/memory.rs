use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::kv::{BackendError, KeyValueBackend};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    counters: HashMap<String, u64>,
}

impl Inner {
    /// Drop the entry if its TTL has elapsed, then return it.
    fn live_entry(&mut self, key: &str) -> Option<&Entry> {
        if let Some(entry) = self.entries.get(key)
            && entry.expires_at <= Instant::now()
        {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }
}

/// In-process implementation of the backing-store contract.
///
/// Suitable for single-node deployments and tests; a multi-process
/// deployment swaps in a shared-server implementation of the same trait.
/// Expired entries are reaped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BackendError> {
        let mut inner = self.inner.lock().await;
        if inner.live_entry(key).is_some() {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, BackendError> {
        let mut inner = self.inner.lock().await;
        let matches = inner
            .live_entry(key)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            inner.entries.remove(key);
        }
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_entry(key).is_some())
    }

    async fn reserve_range(&self, key: &str, count: u64) -> Result<u64, BackendError> {
        let mut inner = self.inner.lock().await;
        let counter = inner.counters.entry(key.to_string()).or_insert(0);
        let start = *counter + 1;
        *counter += count;
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBackend;
    use crate::kv::KeyValueBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn set_nx_refuses_second_writer() {
        let backend = MemoryBackend::new();
        assert!(
            backend
                .set_nx_ex("k", "a", Duration::from_secs(10))
                .await
                .unwrap()
        );
        assert!(
            !backend
                .set_nx_ex("k", "b", Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn compare_and_delete_requires_exact_value() {
        let backend = MemoryBackend::new();
        backend
            .set_nx_ex("k", "token", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!backend.compare_and_delete("k", "other").await.unwrap());
        assert!(backend.exists("k").await.unwrap());

        assert!(backend.compare_and_delete("k", "token").await.unwrap());
        assert!(!backend.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entry_behaves_as_absent() {
        let backend = MemoryBackend::new();
        backend
            .set_nx_ex("k", "a", Duration::from_millis(0))
            .await
            .unwrap();

        assert!(!backend.exists("k").await.unwrap());
        // Key is free again after expiry.
        assert!(
            backend
                .set_nx_ex("k", "b", Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn counter_ranges_are_disjoint_and_contiguous() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.reserve_range("c", 3).await.unwrap(), 1);
        assert_eq!(backend.reserve_range("c", 2).await.unwrap(), 4);
        assert_eq!(backend.reserve_range("c", 1).await.unwrap(), 6);
        // Independent counters do not interact.
        assert_eq!(backend.reserve_range("other", 1).await.unwrap(), 1);
    }
}
