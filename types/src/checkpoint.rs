use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{TaskId, ThreadId};

/// Reserved channel for a task error signal. Duplicate writes to this channel
/// are a caller bug and must surface as a conflict.
pub const ERROR_CHANNEL: &str = "__error__";

/// Reserved channel for an interrupt signal. Same duplicate-write contract as
/// [`ERROR_CHANNEL`].
pub const INTERRUPT_CHANNEL: &str = "__interrupt__";

/// Addressing information for checkpoint operations.
///
/// `thread_id` is mandatory for every store operation; leaving it out is a
/// programmer error. `checkpoint_id` selects an exact snapshot; when absent,
/// reads resolve to the latest snapshot for the thread/namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub thread_id: Option<ThreadId>,
    #[serde(default)]
    pub checkpoint_ns: String,
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    #[must_use]
    pub fn for_thread(thread_id: impl Into<ThreadId>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.checkpoint_ns = ns.into();
        self
    }

    #[must_use]
    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }
}

/// Per-channel version markers, advanced by the caller on each step.
pub type ChannelVersions = Map<String, Value>;

/// A durable, immutable snapshot of one execution step.
///
/// Snapshots are created and superseded, never mutated. History per
/// thread/namespace forms a tree via parent pointers kept by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub state: Value,
    #[serde(default)]
    pub channel_versions: ChannelVersions,
}

impl Checkpoint {
    #[must_use]
    pub fn new(id: impl Into<String>, state: Value) -> Self {
        Self {
            id: id.into(),
            state,
            channel_versions: ChannelVersions::new(),
        }
    }

    #[must_use]
    pub fn with_versions(mut self, versions: ChannelVersions) -> Self {
        self.channel_versions = versions;
        self
    }
}

/// Arbitrary key/value metadata stored alongside a checkpoint.
///
/// `list` filtering matches entries by exact key/value equality only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointMetadata(pub Map<String, Value>);

impl CheckpointMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// True when every `filter` entry is present with an equal value.
    #[must_use]
    pub fn matches(&self, filter: &Map<String, Value>) -> bool {
        filter.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }
}

/// A durable side-effect recorded against a checkpoint before its successor
/// commits, enabling idempotent replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: TaskId,
    pub channel: String,
    pub value: Value,
}

/// Everything the store knows about one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<CheckpointConfig>,
    pub pending_writes: Vec<PendingWrite>,
}

#[cfg(test)]
mod tests {
    use super::{CheckpointConfig, CheckpointMetadata};
    use serde_json::{Map, json};

    #[test]
    fn metadata_filter_requires_every_entry() {
        let meta = CheckpointMetadata::new()
            .with("source", json!("loop"))
            .with("step", json!(3));

        let mut filter = Map::new();
        filter.insert("source".to_string(), json!("loop"));
        assert!(meta.matches(&filter));

        filter.insert("step".to_string(), json!(4));
        assert!(!meta.matches(&filter));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let meta = CheckpointMetadata::new();
        assert!(meta.matches(&Map::new()));
    }

    #[test]
    fn config_builder_sets_namespace_and_id() {
        let config = CheckpointConfig::for_thread("t1")
            .with_namespace("inner")
            .with_checkpoint_id("cp-9");
        assert_eq!(config.thread_id.as_ref().map(|t| t.as_str()), Some("t1"));
        assert_eq!(config.checkpoint_ns, "inner");
        assert_eq!(config.checkpoint_id.as_deref(), Some("cp-9"));
    }
}
