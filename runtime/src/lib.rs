//! Stream normalization and ordered tool execution.
//!
//! [`StreamNormalizer`] folds the canonical provider event stream into the
//! event sequence consumers act on. [`ToolExecutionCoordinator`] runs a
//! batch of model-requested tool calls under a pre-reserved total order,
//! gating mutating tools behind an approval seam. Both take their
//! collaborators by explicit construction; nothing here reaches for
//! ambient state.

mod coordinator;
mod normalizer;
mod traits;

pub use coordinator::{
    BatchOutcome, CoordinatorError, ExecutionContext, ExecutionOptions,
    ToolExecutionCoordinator, is_mutating_tool,
};
pub use normalizer::{StreamNormalizer, ToolCallDeduplicator};
pub use traits::{
    ApprovalError, ApprovalGate, ApprovalRequest, ChannelMessageSink, InvocationMetrics,
    MessageSink, MetricsSink, SinkError, ToolRuntime, TracingMetrics,
};
