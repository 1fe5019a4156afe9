//! Core domain types for Tether.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the runtime.

mod checkpoint;
mod event;
mod ids;
mod session;
mod tool;

pub use checkpoint::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    PendingWrite, ERROR_CHANNEL, INTERRUPT_CHANNEL,
};
pub use event::{
    NormalizedEvent, ProviderEvent, ProviderPayload, StopReason, UsageInfo,
};
pub use ids::{SessionId, TaskId, ThreadId, ToolUseId};
pub use session::{SequenceReservation, Session};
pub use tool::{MessageRecord, ToolExecutionResult, ToolInvocation};
