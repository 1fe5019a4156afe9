use serde::{Deserialize, Serialize};

use crate::tool::ToolInvocation;

/// Why a provider stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Refusal,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
            StopReason::Refusal => "refusal",
        };
        f.write_str(s)
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Payload of one canonical provider event.
///
/// Vendors integrate by emitting this vocabulary; the normalizer never sees
/// wire formats. Payload-less `ToolCall`/`Usage` events are legal and are
/// consumed silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProviderPayload {
    ReasoningDelta { text: String },
    ContentDelta { text: String },
    ToolCall { invocation: Option<ToolInvocation> },
    Usage { usage: Option<UsageInfo> },
    StreamEnd { stop_reason: Option<StopReason> },
}

/// One event of the canonical, ordered provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    #[serde(flatten)]
    pub payload: ProviderPayload,
    #[serde(default)]
    pub block_index: u32,
    /// False while a block is still streaming, true on its terminal event.
    #[serde(default)]
    pub is_final: bool,
}

impl ProviderEvent {
    #[must_use]
    pub fn reasoning_delta(text: impl Into<String>, block_index: u32) -> Self {
        Self {
            payload: ProviderPayload::ReasoningDelta { text: text.into() },
            block_index,
            is_final: false,
        }
    }

    #[must_use]
    pub fn content_delta(text: impl Into<String>, block_index: u32) -> Self {
        Self {
            payload: ProviderPayload::ContentDelta { text: text.into() },
            block_index,
            is_final: false,
        }
    }

    #[must_use]
    pub fn tool_call(invocation: ToolInvocation, block_index: u32) -> Self {
        Self {
            payload: ProviderPayload::ToolCall {
                invocation: Some(invocation),
            },
            block_index,
            is_final: true,
        }
    }

    /// A `tool_call` event whose payload was missing or unparseable.
    #[must_use]
    pub fn empty_tool_call(block_index: u32) -> Self {
        Self {
            payload: ProviderPayload::ToolCall { invocation: None },
            block_index,
            is_final: true,
        }
    }

    #[must_use]
    pub fn usage(usage: UsageInfo) -> Self {
        Self {
            payload: ProviderPayload::Usage { usage: Some(usage) },
            block_index: 0,
            is_final: false,
        }
    }

    #[must_use]
    pub fn stream_end(stop_reason: Option<StopReason>) -> Self {
        Self {
            payload: ProviderPayload::StreamEnd { stop_reason },
            block_index: 0,
            is_final: true,
        }
    }
}

/// One event of the canonical normalized sequence handed to consumers.
///
/// Transient by design; never persisted by this core directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NormalizedEvent {
    ThinkingChunk {
        content: String,
        block_index: u32,
    },
    MessageChunk {
        content: String,
    },
    ThinkingComplete {
        full_thinking: String,
        block_index: u32,
    },
    ToolExecution {
        invocation: ToolInvocation,
    },
    FinalResponse {
        full_content: String,
        stop_reason: StopReason,
    },
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::{ProviderEvent, ProviderPayload, StopReason};

    #[test]
    fn stop_reason_display_matches_wire_names() {
        assert_eq!(StopReason::EndTurn.to_string(), "end_turn");
        assert_eq!(StopReason::ToolUse.to_string(), "tool_use");
        assert_eq!(StopReason::MaxTokens.to_string(), "max_tokens");
        assert_eq!(StopReason::Refusal.to_string(), "refusal");
    }

    #[test]
    fn provider_event_serde_is_tagged() {
        let event = ProviderEvent::content_delta("hi", 2);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "content_delta");
        assert_eq!(json["block_index"], 2);

        let back: ProviderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn stream_end_defaults_to_no_reason() {
        let event = ProviderEvent::stream_end(None);
        match event.payload {
            ProviderPayload::StreamEnd { stop_reason } => assert!(stop_reason.is_none()),
            _ => panic!("expected stream end"),
        }
    }
}
