//! External collaborator seams for the coordinator.
//!
//! Everything the coordinator touches outside this crate arrives through an
//! explicitly constructed collaborator, never ambient state, so each seam
//! can be replaced in tests.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use tether_types::{MessageRecord, SessionId};

/// Opaque tool execution capability. Input is arbitrary structured data the
/// runtime must accept safely; the error string is the tool's own message.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn execute(&self, name: &str, input: &Value) -> Result<Value, String>;
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub session_id: SessionId,
    pub tool_name: String,
    pub tool_args: Value,
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval request timed out")]
    Timeout,

    #[error("approval gate failed: {0}")]
    Failed(String),
}

/// Human consent checkpoint for mutating tools. May deny or fail; the
/// coordinator converts both into error results, never exceptions.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request(&self, request: ApprovalRequest) -> Result<bool, ApprovalError>;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("message queue is full")]
    Full,

    #[error("message queue receiver is gone")]
    Closed,
}

/// Fire-and-forget sink for downstream message persistence. Must never
/// block; a full queue is reported, not waited on.
pub trait MessageSink: Send + Sync {
    fn enqueue(&self, record: MessageRecord) -> Result<(), SinkError>;
}

/// [`MessageSink`] over a bounded tokio channel. Overflow surfaces as
/// [`SinkError::Full`] and the record is dropped by the caller.
pub struct ChannelMessageSink {
    tx: tokio::sync::mpsc::Sender<MessageRecord>,
}

impl ChannelMessageSink {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<MessageRecord>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelMessageSink {
    fn enqueue(&self, record: MessageRecord) -> Result<(), SinkError> {
        self.tx.try_send(record).map_err(|e| match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => SinkError::Full,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Best-effort per-invocation measurements.
#[derive(Debug, Clone)]
pub struct InvocationMetrics {
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub turn_count: u32,
    pub batch_index: usize,
}

/// Metrics recipient. Implementations must not fail the primary path.
pub trait MetricsSink: Send + Sync {
    fn record_invocation(&self, metrics: &InvocationMetrics);
}

/// Default metrics sink: structured log lines only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_invocation(&self, metrics: &InvocationMetrics) {
        tracing::debug!(
            tool = %metrics.tool_name,
            success = metrics.success,
            duration_ms = metrics.duration_ms,
            turn = metrics.turn_count,
            batch_index = metrics.batch_index,
            "tool invocation finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelMessageSink, MessageSink, SinkError};
    use tether_types::{MessageRecord, SessionId};

    fn record(n: u64) -> MessageRecord {
        MessageRecord {
            session_id: SessionId::from("s1"),
            message_id: format!("m{n}"),
            role: "tool".to_string(),
            message_type: "tool_result".to_string(),
            sequence_number: n,
            tool_use_id: None,
        }
    }

    #[tokio::test]
    async fn full_queue_reports_instead_of_blocking() {
        let (sink, mut rx) = ChannelMessageSink::bounded(1);

        sink.enqueue(record(1)).unwrap();
        assert!(matches!(sink.enqueue(record(2)), Err(SinkError::Full)));

        assert_eq!(rx.recv().await.unwrap().sequence_number, 1);
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (sink, rx) = ChannelMessageSink::bounded(1);
        drop(rx);
        assert!(matches!(sink.enqueue(record(1)), Err(SinkError::Closed)));
    }
}
