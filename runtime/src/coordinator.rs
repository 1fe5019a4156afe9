//! Ordered tool execution.
//!
//! A batch of model-requested tool calls executes concurrently, but its
//! results are totally ordered: every invocation gets a sequence number
//! reserved before any tool runs, and the returned results sit in
//! invocation order regardless of completion timing. Mutating tools pass
//! through the approval gate first. Once a result exists, nothing that
//! happens downstream (event log, message queue, callback, metrics) may
//! lose or abort it.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use thiserror::Error;
use uuid::Uuid;

use tether_backend::{AllocatorError, SequenceAllocator};
use tether_storage::ToolEventLog;
use tether_types::{MessageRecord, SessionId, ToolExecutionResult, ToolInvocation};

use crate::traits::{
    ApprovalGate, ApprovalRequest, InvocationMetrics, MessageSink, MetricsSink, ToolRuntime,
    TracingMetrics,
};

const MUTATING_VERBS: [&str; 6] = ["create", "update", "delete", "post", "patch", "put"];

/// True when the tool name implies external state change. The verb may
/// appear anywhere in the name, matched case-insensitively.
#[must_use]
pub fn is_mutating_tool(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    MUTATING_VERBS.iter().any(|verb| lower.contains(verb))
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Reservation is the one step that must succeed before any tool runs;
    /// without it there is no stable order to promise.
    #[error("sequence reservation failed: {0}")]
    Allocation(#[from] AllocatorError),
}

/// Who and where a batch runs for.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: SessionId,
    pub user_id: String,
    pub turn_count: u32,
}

/// Per-batch collaborators supplied by the caller.
#[derive(Default)]
pub struct ExecutionOptions<'a> {
    /// Consulted for mutating tools only. Absent gate means mutating tools
    /// run unguarded.
    pub approval_gate: Option<&'a dyn ApprovalGate>,
    /// Observes each result as its invocation settles.
    pub on_result: Option<&'a (dyn Fn(&ToolExecutionResult) + Send + Sync)>,
}

/// What one batch produced.
#[derive(Debug)]
pub struct BatchOutcome {
    /// In invocation order, each carrying its pre-assigned sequence number.
    pub results: Vec<ToolExecutionResult>,
    /// Distinct tool names, in first-use order.
    pub tool_names_used: Vec<String>,
    /// True when every result is non-error.
    pub success: bool,
}

enum Authorization {
    Approved,
    Refused(String),
}

pub struct ToolExecutionCoordinator {
    allocator: Arc<SequenceAllocator>,
    runtime: Arc<dyn ToolRuntime>,
    event_log: Option<Arc<ToolEventLog>>,
    message_sink: Option<Arc<dyn MessageSink>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ToolExecutionCoordinator {
    #[must_use]
    pub fn new(allocator: Arc<SequenceAllocator>, runtime: Arc<dyn ToolRuntime>) -> Self {
        Self {
            allocator,
            runtime,
            event_log: None,
            message_sink: None,
            metrics: Arc::new(TracingMetrics),
        }
    }

    #[must_use]
    pub fn with_event_log(mut self, log: Arc<ToolEventLog>) -> Self {
        self.event_log = Some(log);
        self
    }

    #[must_use]
    pub fn with_message_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.message_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Execute a batch of invocations for one session.
    ///
    /// Only reservation failure escapes as an error. Everything that goes
    /// wrong past that point (denial, gate failure, tool failure, side
    /// channels) is captured in the per-invocation results.
    pub async fn execute_tools(
        &self,
        invocations: &[ToolInvocation],
        context: &ExecutionContext,
        options: ExecutionOptions<'_>,
    ) -> Result<BatchOutcome, CoordinatorError> {
        if invocations.is_empty() {
            return Ok(BatchOutcome {
                results: Vec::new(),
                tool_names_used: Vec::new(),
                success: true,
            });
        }

        let reservation = self
            .allocator
            .reserve_batch(&context.session_id, invocations.len() as u64)
            .await?;

        tracing::debug!(
            session = %context.session_id,
            batch_size = invocations.len(),
            start = reservation.start_sequence,
            "executing tool batch"
        );

        // join_all preserves positional order, so the i-th result carries
        // the i-th reserved sequence no matter which tool finished first.
        let futures = invocations
            .iter()
            .zip(reservation.sequences.iter().copied())
            .enumerate()
            .map(|(batch_index, (invocation, sequence))| {
                self.run_one(invocation, sequence, batch_index, context, &options)
            });
        let results = join_all(futures).await;

        let mut tool_names_used: Vec<String> = Vec::new();
        for invocation in invocations {
            if !tool_names_used.contains(&invocation.tool_name) {
                tool_names_used.push(invocation.tool_name.clone());
            }
        }
        let success = results.iter().all(|r| !r.is_error);

        Ok(BatchOutcome {
            results,
            tool_names_used,
            success,
        })
    }

    async fn run_one(
        &self,
        invocation: &ToolInvocation,
        sequence: u64,
        batch_index: usize,
        context: &ExecutionContext,
        options: &ExecutionOptions<'_>,
    ) -> ToolExecutionResult {
        let started = Instant::now();

        let result = match self.authorize(invocation, context, options).await {
            Authorization::Approved => {
                match self
                    .runtime
                    .execute(&invocation.tool_name, &invocation.input)
                    .await
                {
                    Ok(output) => ToolExecutionResult::success(
                        invocation,
                        sequence,
                        output,
                        elapsed_ms(started),
                    ),
                    Err(message) => ToolExecutionResult::error(
                        invocation,
                        sequence,
                        message,
                        elapsed_ms(started),
                    ),
                }
            }
            Authorization::Refused(message) => {
                ToolExecutionResult::error(invocation, sequence, message, elapsed_ms(started))
            }
        };

        self.settle(&result, batch_index, context, options);
        result
    }

    async fn authorize(
        &self,
        invocation: &ToolInvocation,
        context: &ExecutionContext,
        options: &ExecutionOptions<'_>,
    ) -> Authorization {
        if !is_mutating_tool(&invocation.tool_name) {
            return Authorization::Approved;
        }
        let Some(gate) = options.approval_gate else {
            return Authorization::Approved;
        };

        let request = ApprovalRequest {
            session_id: context.session_id.clone(),
            tool_name: invocation.tool_name.clone(),
            tool_args: invocation.input.clone(),
        };
        match gate.request(request).await {
            Ok(true) => Authorization::Approved,
            Ok(false) => Authorization::Refused(format!(
                "approval denied: {} cancelled by user",
                invocation.tool_name
            )),
            Err(e) => {
                tracing::warn!(
                    tool = %invocation.tool_name,
                    error = %e,
                    "approval gate failed"
                );
                Authorization::Refused(format!("approval check failed: {e}"))
            }
        }
    }

    /// Everything downstream of a settled result is best-effort: log,
    /// enqueue, notify, measure. Failures are warnings, never aborts.
    fn settle(
        &self,
        result: &ToolExecutionResult,
        batch_index: usize,
        context: &ExecutionContext,
        options: &ExecutionOptions<'_>,
    ) {
        if let Some(log) = &self.event_log
            && let Err(e) = log.record(&context.session_id, result)
        {
            tracing::warn!(
                sequence = result.sequence_number,
                error = %e,
                "tool event log write failed"
            );
        }

        if let Some(sink) = &self.message_sink {
            let record = MessageRecord {
                session_id: context.session_id.clone(),
                message_id: Uuid::new_v4().to_string(),
                role: "tool".to_string(),
                message_type: "tool_result".to_string(),
                sequence_number: result.sequence_number,
                tool_use_id: Some(result.tool_use_id.clone()),
            };
            if let Err(e) = sink.enqueue(record) {
                tracing::warn!(
                    sequence = result.sequence_number,
                    error = %e,
                    "dropping message record"
                );
            }
        }

        if let Some(on_result) = options.on_result {
            on_result(result);
        }

        self.metrics.record_invocation(&InvocationMetrics {
            tool_name: result.tool_name.clone(),
            success: !result.is_error,
            duration_ms: result.duration_ms,
            turn_count: context.turn_count,
            batch_index,
        });
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
