//! Execution context handed to step functions and edge conditions

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where in an execution a step function or condition is running
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    graph_id: String,
    thread_id: String,
    node_id: String,
    step_index: i64,
    attempt: u32,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub(crate) fn new(
        graph_id: impl Into<String>,
        thread_id: impl Into<String>,
        node_id: impl Into<String>,
        step_index: i64,
        deadline: Option<Instant>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            graph_id: graph_id.into(),
            thread_id: thread_id.into(),
            node_id: node_id.into(),
            step_index,
            attempt: 1,
            deadline,
            cancellation,
        }
    }

    pub(crate) fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Graph being executed
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    /// Checkpoint thread of this execution
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Node being executed (for conditions: the node whose edges are evaluated)
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// 0-based step index within the execution
    pub fn step_index(&self) -> i64 {
        self.step_index
    }

    /// 1-based attempt number of the current node
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Execution deadline, if one is configured
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the execution has been interrupted.
    ///
    /// The executor only acts on interrupts between nodes; long-running step
    /// functions may poll this to stop early.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token cancelled when the execution is interrupted
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
