use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// One tenant-scoped agent session.
///
/// A session is the serialization domain for sequence numbering and lock
/// keys; two sessions never coordinate with each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: String,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<SessionId>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
        }
    }
}

/// An atomically granted, contiguous block of sequence numbers.
///
/// Numbers are assigned before the work they back begins and are never
/// reused, even if that work fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceReservation {
    pub session_id: SessionId,
    pub start_sequence: u64,
    pub sequences: Vec<u64>,
    pub reserved_at: DateTime<Utc>,
}

impl SequenceReservation {
    /// Build a reservation covering `start..start + count`.
    #[must_use]
    pub fn new(session_id: SessionId, start: u64, count: u64) -> Self {
        Self {
            session_id,
            start_sequence: start,
            sequences: (start..start + count).collect(),
            reserved_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Highest sequence number in the block, if any.
    #[must_use]
    pub fn end_sequence(&self) -> Option<u64> {
        self.sequences.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::SequenceReservation;
    use crate::ids::SessionId;

    #[test]
    fn reservation_is_contiguous_and_ascending() {
        let r = SequenceReservation::new(SessionId::from("s1"), 5, 4);
        assert_eq!(r.start_sequence, 5);
        assert_eq!(r.sequences, vec![5, 6, 7, 8]);
        assert_eq!(r.end_sequence(), Some(8));
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn zero_count_reservation_is_empty() {
        let r = SequenceReservation::new(SessionId::from("s1"), 10, 0);
        assert!(r.is_empty());
        assert_eq!(r.end_sequence(), None);
    }
}
