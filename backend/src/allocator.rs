use std::sync::Arc;

use thiserror::Error;

use tether_types::{SequenceReservation, SessionId};

use crate::kv::{BackendError, KeyValueBackend};

#[derive(Debug, Error)]
pub enum AllocatorError {
    /// Zero-count reservations are a programmer error, not a storage state.
    #[error("cannot reserve a batch of zero sequence numbers")]
    InvalidCount,

    #[error("sequence counter unreachable: {0}")]
    Storage(#[from] BackendError),
}

/// Issues gap-free, monotonically increasing per-session sequence numbers.
///
/// All atomicity lives in the backend's range reservation: two concurrent
/// `reserve_batch` calls for the same session are serialized there and can
/// never observe overlapping ranges. Numbers are consumed exactly once and
/// never reissued, even when the work they back fails.
pub struct SequenceAllocator {
    backend: Arc<dyn KeyValueBackend>,
}

impl SequenceAllocator {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    fn counter_key(session_id: &SessionId) -> String {
        format!("seq:{session_id}")
    }

    /// Reserve `count` contiguous numbers continuing from the session's last
    /// issued number. No partial issuance on failure.
    pub async fn reserve_batch(
        &self,
        session_id: &SessionId,
        count: u64,
    ) -> Result<SequenceReservation, AllocatorError> {
        if count == 0 {
            return Err(AllocatorError::InvalidCount);
        }

        let start = self
            .backend
            .reserve_range(&Self::counter_key(session_id), count)
            .await?;

        tracing::debug!(
            session = %session_id,
            start,
            count,
            "reserved sequence block"
        );

        Ok(SequenceReservation::new(session_id.clone(), start, count))
    }

    /// The count=1 case of [`reserve_batch`](Self::reserve_batch).
    pub async fn next(&self, session_id: &SessionId) -> Result<u64, AllocatorError> {
        let reservation = self.reserve_batch(session_id, 1).await?;
        Ok(reservation.start_sequence)
    }
}
