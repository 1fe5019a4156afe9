use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{SessionId, ToolUseId};

/// An immutable model-requested tool call.
///
/// `input` is opaque structured data; the runtime persists it but never
/// inspects its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_use_id: ToolUseId,
    pub tool_name: String,
    pub input: Value,
}

impl ToolInvocation {
    #[must_use]
    pub fn new(tool_use_id: impl Into<ToolUseId>, tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            input,
        }
    }
}

/// Outcome of one tool invocation.
///
/// The sequence number is fixed at reservation time and is carried even when
/// the invocation failed, so downstream ordering never depends on completion
/// timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub tool_use_id: ToolUseId,
    pub tool_name: String,
    pub sequence_number: u64,
    pub output: Value,
    pub is_error: bool,
    pub duration_ms: u64,
}

impl ToolExecutionResult {
    #[must_use]
    pub fn success(
        invocation: &ToolInvocation,
        sequence_number: u64,
        output: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_use_id: invocation.tool_use_id.clone(),
            tool_name: invocation.tool_name.clone(),
            sequence_number,
            output,
            is_error: false,
            duration_ms,
        }
    }

    #[must_use]
    pub fn error(
        invocation: &ToolInvocation,
        sequence_number: u64,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_use_id: invocation.tool_use_id.clone(),
            tool_name: invocation.tool_name.clone(),
            sequence_number,
            output: Value::String(message.into()),
            is_error: true,
            duration_ms,
        }
    }
}

/// One record handed to the downstream message-persistence queue.
///
/// The queue is fire-and-forget; this struct is the whole contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub session_id: SessionId,
    pub message_id: String,
    pub role: String,
    pub message_type: String,
    pub sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<ToolUseId>,
}
