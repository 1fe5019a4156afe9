//! Normalizes the canonical provider event stream into the event sequence
//! consumers render and act on.
//!
//! The state machine carries exactly two accumulators (thinking and
//! content), both scoped to a single `process` call. It never buffers
//! beyond them and never reorders: all events produced by one input event
//! are yielded before the next input event is consumed, and the consumer
//! drives iteration.

use std::collections::HashSet;

use futures_util::{Stream, StreamExt, stream};

use tether_types::{NormalizedEvent, ProviderEvent, ProviderPayload, StopReason, ToolUseId};

/// Remembers which tool-use ids have already produced a `ToolExecution`
/// within one `process` call. Some vendors replay a tool call on both the
/// streaming and final shapes of the same block.
#[derive(Debug, Default)]
pub struct ToolCallDeduplicator {
    seen: HashSet<ToolUseId>,
}

impl ToolCallDeduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time an id is observed.
    pub fn first_sighting(&mut self, id: &ToolUseId) -> bool {
        self.seen.insert(id.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamNormalizer {
    deduplicate_tool_calls: bool,
}

impl StreamNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            deduplicate_tool_calls: false,
        }
    }

    /// Drop repeated `tool_call` events sharing a tool-use id within one
    /// `process` call.
    #[must_use]
    pub fn with_deduplication() -> Self {
        Self {
            deduplicate_tool_calls: true,
        }
    }

    /// Normalize one provider stream. Accumulator and deduplicator state is
    /// fresh per call; stopping early is always safe because no resource
    /// outlives the returned stream.
    pub fn process<S>(&self, events: S) -> impl Stream<Item = NormalizedEvent> + use<S>
    where
        S: Stream<Item = ProviderEvent>,
    {
        let mut pass = Pass::new(self.deduplicate_tool_calls);
        events.flat_map(move |event| stream::iter(pass.on_event(event)))
    }
}

impl Default for StreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call normalization state.
struct Pass {
    thinking: String,
    content: String,
    thinking_complete: bool,
    dedup: Option<ToolCallDeduplicator>,
}

impl Pass {
    fn new(deduplicate: bool) -> Self {
        Self {
            thinking: String::new(),
            content: String::new(),
            thinking_complete: false,
            dedup: deduplicate.then(ToolCallDeduplicator::new),
        }
    }

    fn on_event(&mut self, event: ProviderEvent) -> Vec<NormalizedEvent> {
        match event.payload {
            ProviderPayload::ReasoningDelta { text } => {
                if text.is_empty() {
                    return Vec::new();
                }
                self.thinking.push_str(&text);
                vec![NormalizedEvent::ThinkingChunk {
                    content: text,
                    block_index: event.block_index,
                }]
            }
            ProviderPayload::ContentDelta { text } => {
                if text.is_empty() {
                    return Vec::new();
                }
                let mut out = Vec::with_capacity(2);
                if let Some(complete) = self.complete_thinking() {
                    out.push(complete);
                }
                self.content.push_str(&text);
                out.push(NormalizedEvent::MessageChunk { content: text });
                out
            }
            ProviderPayload::ToolCall { invocation } => {
                let Some(invocation) = invocation else {
                    return Vec::new();
                };
                if let Some(dedup) = &mut self.dedup
                    && !dedup.first_sighting(&invocation.tool_use_id)
                {
                    tracing::debug!(
                        tool_use_id = %invocation.tool_use_id,
                        "dropping duplicate tool call"
                    );
                    return Vec::new();
                }
                vec![NormalizedEvent::ToolExecution { invocation }]
            }
            ProviderPayload::Usage { usage } => {
                let Some(usage) = usage else {
                    return Vec::new();
                };
                vec![NormalizedEvent::Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                }]
            }
            ProviderPayload::StreamEnd { stop_reason } => {
                let mut out = Vec::with_capacity(2);
                if let Some(complete) = self.complete_thinking() {
                    out.push(complete);
                }
                if !self.content.is_empty() {
                    out.push(NormalizedEvent::FinalResponse {
                        full_content: self.content.clone(),
                        stop_reason: stop_reason.unwrap_or(StopReason::EndTurn),
                    });
                }
                out
            }
        }
    }

    /// At most one `ThinkingComplete` per call, and only when there was any
    /// thinking at all.
    fn complete_thinking(&mut self) -> Option<NormalizedEvent> {
        if self.thinking.is_empty() || self.thinking_complete {
            return None;
        }
        self.thinking_complete = true;
        Some(NormalizedEvent::ThinkingComplete {
            full_thinking: self.thinking.clone(),
            block_index: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::StreamNormalizer;
    use futures_util::{StreamExt, stream};
    use serde_json::json;
    use tether_types::{
        NormalizedEvent, ProviderEvent, StopReason, ToolInvocation, UsageInfo,
    };

    async fn run(normalizer: StreamNormalizer, events: Vec<ProviderEvent>) -> Vec<NormalizedEvent> {
        normalizer.process(stream::iter(events)).collect().await
    }

    #[tokio::test]
    async fn thinking_then_content_yields_the_canonical_six() {
        let events = vec![
            ProviderEvent::reasoning_delta("A", 0),
            ProviderEvent::reasoning_delta("B", 0),
            ProviderEvent::content_delta("X", 1),
            ProviderEvent::content_delta("Y", 1),
            ProviderEvent::stream_end(None),
        ];

        let out = run(StreamNormalizer::new(), events).await;
        assert_eq!(
            out,
            vec![
                NormalizedEvent::ThinkingChunk {
                    content: "A".into(),
                    block_index: 0
                },
                NormalizedEvent::ThinkingChunk {
                    content: "B".into(),
                    block_index: 0
                },
                NormalizedEvent::ThinkingComplete {
                    full_thinking: "AB".into(),
                    block_index: 0
                },
                NormalizedEvent::MessageChunk { content: "X".into() },
                NormalizedEvent::MessageChunk { content: "Y".into() },
                NormalizedEvent::FinalResponse {
                    full_content: "XY".into(),
                    stop_reason: StopReason::EndTurn
                },
            ]
        );
    }

    #[tokio::test]
    async fn bare_stream_end_yields_nothing() {
        let out = run(StreamNormalizer::new(), vec![ProviderEvent::stream_end(None)]).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn empty_deltas_are_noops() {
        let events = vec![
            ProviderEvent::reasoning_delta("", 0),
            ProviderEvent::content_delta("", 0),
            ProviderEvent::stream_end(None),
        ];
        let out = run(StreamNormalizer::new(), events).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn thinking_without_content_completes_at_stream_end() {
        let events = vec![
            ProviderEvent::reasoning_delta("plan", 0),
            ProviderEvent::stream_end(None),
        ];
        let out = run(StreamNormalizer::new(), events).await;
        // thinking_complete fires, final_response is suppressed.
        assert_eq!(
            out,
            vec![
                NormalizedEvent::ThinkingChunk {
                    content: "plan".into(),
                    block_index: 0
                },
                NormalizedEvent::ThinkingComplete {
                    full_thinking: "plan".into(),
                    block_index: 0
                },
            ]
        );
    }

    #[tokio::test]
    async fn explicit_stop_reason_is_kept() {
        let events = vec![
            ProviderEvent::content_delta("done", 0),
            ProviderEvent::stream_end(Some(StopReason::ToolUse)),
        ];
        let out = run(StreamNormalizer::new(), events).await;
        assert_eq!(
            out.last(),
            Some(&NormalizedEvent::FinalResponse {
                full_content: "done".into(),
                stop_reason: StopReason::ToolUse
            })
        );
    }

    #[tokio::test]
    async fn payloadless_tool_call_and_usage_are_silent() {
        let events = vec![
            ProviderEvent::empty_tool_call(0),
            ProviderEvent {
                payload: tether_types::ProviderPayload::Usage { usage: None },
                block_index: 0,
                is_final: false,
            },
            ProviderEvent::stream_end(None),
        ];
        let out = run(StreamNormalizer::new(), events).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn usage_passes_through() {
        let events = vec![ProviderEvent::usage(UsageInfo {
            input_tokens: 10,
            output_tokens: 3,
        })];
        let out = run(StreamNormalizer::new(), events).await;
        assert_eq!(
            out,
            vec![NormalizedEvent::Usage {
                input_tokens: 10,
                output_tokens: 3
            }]
        );
    }

    #[tokio::test]
    async fn deduplicator_drops_repeats_within_one_call_only() {
        let invocation = ToolInvocation::new("tu_1", "lookup", json!({"q": 1}));
        let events = vec![
            ProviderEvent::tool_call(invocation.clone(), 0),
            ProviderEvent::tool_call(invocation.clone(), 0),
        ];

        let normalizer = StreamNormalizer::with_deduplication();
        let out = run(normalizer, events.clone()).await;
        assert_eq!(out.len(), 1);

        // A fresh call does not remember prior ids.
        let again = run(normalizer, events).await;
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn without_deduplicator_repeats_pass_through() {
        let invocation = ToolInvocation::new("tu_1", "lookup", json!({}));
        let events = vec![
            ProviderEvent::tool_call(invocation.clone(), 0),
            ProviderEvent::tool_call(invocation, 0),
        ];
        let out = run(StreamNormalizer::new(), events).await;
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn consumer_may_stop_pulling_early() {
        let events = vec![
            ProviderEvent::content_delta("X", 0),
            ProviderEvent::content_delta("Y", 0),
            ProviderEvent::stream_end(None),
        ];
        let stream = StreamNormalizer::new().process(stream::iter(events));
        let first: Vec<_> = stream.take(1).collect().await;
        assert_eq!(
            first,
            vec![NormalizedEvent::MessageChunk { content: "X".into() }]
        );
    }
}
