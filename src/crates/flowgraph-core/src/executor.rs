//! Graph execution
//!
//! # Execution Loop
//!
//! ```text
//!            validate ──✗──► Validation error (no node runs)
//!               │
//!               ▼
//!   ┌──► cancelled? deadline? iteration bound? ──✗──► Cancelled / TimedOut / MaxIterationsExceeded
//!   │           │
//!   │           ▼
//!   │    run node (retries, cancellable delay) ──✗──► NodeExecution
//!   │           │
//!   │    record result ─► history + result queue (try_publish)
//!   │    save checkpoint "{node}-{step}" ──✗──► StorageError
//!   │           │
//!   │    end node? ──► Completed
//!   │           │
//!   │    route ──✗──► Routing error
//!   │           │          no outgoing edges ──► Completed
//!   └───────────┘
//! ```
//!
//! Cancellation and the deadline are cooperative. They are observed between
//! node executions and while waiting between retries, never inside a running
//! step function.
//!
//! # Failures
//!
//! Every entry point returns `Result<ExecutionReport, ExecutionFailure>`.
//! A failure still carries the best-known state (including partial mutations
//! of a failed node) and the execution history.
//!
//! # Interrupting
//!
//! Each execution installs a fresh cancellation token when it starts;
//! [`Graph::interrupt`] cancels that token and also leaves a pending request
//! behind. An execution that is queued or not yet polled picks the request
//! up when it installs its token, so it stops at its first loop boundary.
//! The request is cleared when that execution finishes, which means an
//! interrupt never leaks into a later run. Callers that need scoped
//! cancellation can pass their own token to
//! [`Graph::execute_with_cancellation`].

use crate::context::ExecutionContext;
use crate::error::{GraphError, Result};
use crate::graph::{ExecutionStatus, Graph, Node};
use crate::retry::RetryPolicy;
use crate::state::State;
use crate::stream::ExecutionResult;
use chrono::Utc;
use flowgraph_checkpoint::CheckpointId;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of an execution that reached completion
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Always [`ExecutionStatus::Completed`]
    pub status: ExecutionStatus,
    /// Final working state
    pub state: State,
    /// One record per node execution, in completion order
    pub history: Vec<ExecutionResult>,
    /// Node executions performed
    pub iterations: usize,
    /// Last node executed
    pub last_node: Option<String>,
    pub elapsed: Duration,
    /// Checkpoints saved during this execution
    pub checkpoints: Vec<CheckpointId>,
}

/// An execution that stopped before completion
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    /// Terminal status derived from the error
    pub status: ExecutionStatus,
    #[source]
    pub error: GraphError,
    /// Best-known state at the point of failure
    pub state: State,
    /// Results recorded before the failure
    pub history: Vec<ExecutionResult>,
}

impl ExecutionFailure {
    pub fn into_error(self) -> GraphError {
        self.error
    }
}

/// Where the loop begins
enum Entry {
    Start,
    /// Route onward from a node that already ran at `step`
    After { node: String, step: i64 },
}

/// Loop bookkeeping, kept when the loop fails so the caller gets the state
struct Progress {
    working: State,
    iterations: usize,
    last_node: Option<String>,
    checkpoints: Vec<CheckpointId>,
}

struct StepFailure {
    message: String,
    error: GraphError,
}

struct NodeRun {
    attempts: u32,
    duration: Duration,
    outcome: std::result::Result<State, StepFailure>,
}

impl Graph {
    /// Run the graph from the start node with a copy of `initial`
    #[tracing::instrument(skip(self, initial), fields(graph_id = %self.id, thread_id = %self.config.thread_id, node_count = self.nodes.len()))]
    pub async fn execute(
        &self,
        initial: &State,
    ) -> std::result::Result<ExecutionReport, ExecutionFailure> {
        self.run(initial.clone(), Entry::Start, CancellationToken::new())
            .await
    }

    /// Run the graph under a caller-owned cancellation token.
    ///
    /// Cancelling `token` stops the execution at the next loop boundary, as
    /// does [`interrupt`](Graph::interrupt).
    #[tracing::instrument(skip(self, initial, token), fields(graph_id = %self.id, thread_id = %self.config.thread_id, node_count = self.nodes.len()))]
    pub async fn execute_with_cancellation(
        &self,
        initial: &State,
        token: CancellationToken,
    ) -> std::result::Result<ExecutionReport, ExecutionFailure> {
        self.run(initial.clone(), Entry::Start, token).await
    }

    /// Continue the configured thread from a saved checkpoint.
    ///
    /// The checkpoint's state becomes the working state and execution routes
    /// onward from the checkpoint's node, numbering steps after it. If that
    /// node is an end node the execution completes immediately.
    #[tracing::instrument(skip(self), fields(graph_id = %self.id, thread_id = %self.config.thread_id))]
    pub async fn resume_from_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> std::result::Result<ExecutionReport, ExecutionFailure> {
        let checkpoint = match self
            .checkpoints
            .load_checkpoint(&self.config.thread_id, checkpoint_id)
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                return Err(ExecutionFailure {
                    status: ExecutionStatus::StorageError,
                    error: e.into(),
                    state: self.current_state(),
                    history: self.execution_history(),
                })
            }
        };

        tracing::info!(
            checkpoint_id,
            node_id = %checkpoint.node_id,
            step = checkpoint.step_index,
            "Resuming from checkpoint"
        );

        let state = State::from_state_data(checkpoint.state)
            .into_history_capacity(self.config.history_capacity);
        let entry = Entry::After {
            node: checkpoint.node_id,
            step: checkpoint.step_index,
        };
        self.run(state, entry, CancellationToken::new()).await
    }

    /// Cancel the running execution at its next loop boundary
    ///
    /// With no execution running, the next one to start is cancelled before
    /// its first node.
    pub fn interrupt(&self) {
        tracing::info!(graph_id = %self.id, "Interrupt requested");
        self.runtime.interrupt();
    }

    async fn run(
        &self,
        working: State,
        entry: Entry,
        parent: CancellationToken,
    ) -> std::result::Result<ExecutionReport, ExecutionFailure> {
        let _guard = self.runtime.run_lock.lock().await;
        let token = parent.child_token();
        let _armed = self.runtime.arm(token.clone());

        if let Err(error) = self.validate() {
            tracing::warn!(error = %error, "Graph validation failed");
            self.set_status(ExecutionStatus::Idle);
            return Err(ExecutionFailure {
                status: ExecutionStatus::from_error(&error),
                error,
                state: working,
                history: Vec::new(),
            });
        }
        self.set_status(ExecutionStatus::Validated);

        self.runtime.history.lock().clear();
        *self.runtime.current_state.lock() = working.clone();
        self.set_status(ExecutionStatus::Running);

        let started = Instant::now();
        let deadline = self.config.timeout().map(|t| started + t);
        let mut progress = Progress {
            working,
            iterations: 0,
            last_node: None,
            checkpoints: Vec::new(),
        };

        let outcome = self
            .run_loop(entry, &mut progress, &token, deadline)
            .await;
        *self.runtime.current_state.lock() = progress.working.clone();

        match outcome {
            Ok(()) => {
                self.set_status(ExecutionStatus::Completed);
                tracing::info!(
                    iterations = progress.iterations,
                    last_node = progress.last_node.as_deref().unwrap_or(""),
                    "Execution completed"
                );
                Ok(ExecutionReport {
                    status: ExecutionStatus::Completed,
                    state: progress.working,
                    history: self.execution_history(),
                    iterations: progress.iterations,
                    last_node: progress.last_node,
                    elapsed: started.elapsed(),
                    checkpoints: progress.checkpoints,
                })
            }
            Err(error) => {
                let status = ExecutionStatus::from_error(&error);
                self.set_status(status);
                tracing::info!(?status, error = %error, iterations = progress.iterations, "Execution stopped");
                Err(ExecutionFailure {
                    status,
                    error,
                    state: progress.working,
                    history: self.execution_history(),
                })
            }
        }
    }

    async fn run_loop(
        &self,
        entry: Entry,
        progress: &mut Progress,
        token: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let (mut current, mut step) = match entry {
            Entry::Start => match &self.start {
                Some(start) => (start.clone(), 0),
                None => return Err(GraphError::Validation("start node is not set".to_string())),
            },
            Entry::After { node, step } => {
                if !self.nodes.contains_key(&node) {
                    return Err(GraphError::Validation(format!(
                        "checkpoint node '{node}' is not part of the graph"
                    )));
                }
                progress.last_node = Some(node.clone());
                if self.is_end(&node) {
                    return Ok(());
                }
                let ctx = self.context(&node, step, deadline, token);
                match self.next_node(&ctx, &node, &progress.working)? {
                    Some(next) => (next, step + 1),
                    None => return Ok(()),
                }
            }
        };

        loop {
            if token.is_cancelled() {
                return Err(GraphError::Cancelled {
                    last_node: progress.last_node.clone(),
                });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(self.timeout_error());
            }
            if progress.iterations >= self.config.max_iterations {
                return Err(GraphError::MaxIterationsExceeded {
                    limit: self.config.max_iterations,
                });
            }

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::Validation(format!("node '{current}' does not exist")))?;
            let ctx = self.context(&current, step, deadline, token);

            tracing::debug!(node_id = %current, step, "Executing node");
            let attempt_state = progress.working.clone();
            let run = run_node(
                node,
                &self.config.retry,
                ctx.clone(),
                &attempt_state,
                progress.last_node.as_deref(),
                self.config.timeout(),
            )
            .await;

            progress.iterations += 1;
            self.runtime.record(result_for(node, step, &run, &attempt_state));

            match run.outcome {
                Ok(next) => progress.working = next,
                Err(failure) => {
                    progress.working = attempt_state;
                    return Err(failure.error);
                }
            }
            progress.last_node = Some(current.clone());
            *self.runtime.current_state.lock() = progress.working.clone();

            if self.config.checkpointing {
                if let Some(id) = self
                    .checkpoints
                    .save_checkpoint(
                        &self.config.thread_id,
                        &current,
                        step,
                        progress.working.to_state_data(),
                    )
                    .await?
                {
                    progress.checkpoints.push(id);
                }
            }

            if self.is_end(&current) {
                return Ok(());
            }

            match self.next_node(&ctx, &current, &progress.working)? {
                Some(next) => {
                    tracing::debug!(from = %current, to = %next, "Routed");
                    current = next;
                    step += 1;
                }
                None => {
                    tracing::debug!(node_id = %current, "No outgoing edges, completing");
                    return Ok(());
                }
            }
        }
    }

    /// Resolve the node following `from`; `None` when it has no outgoing edges
    fn next_node(
        &self,
        ctx: &ExecutionContext,
        from: &str,
        state: &State,
    ) -> Result<Option<String>> {
        let outgoing: Vec<_> = self.outgoing(from).collect();
        match outgoing.as_slice() {
            [] => return Ok(None),
            [only] if !only.is_conditional() => return Ok(Some(only.to.clone())),
            _ => {}
        }

        let mut returned = Vec::new();
        for edge in outgoing {
            let Some(condition) = &edge.condition else {
                return Ok(Some(edge.to.clone()));
            };
            let target = condition(ctx, state).map_err(|e| {
                GraphError::routing(from, format!("condition on edge '{}' failed: {e}", edge.id))
            })?;
            if target == edge.to {
                return Ok(Some(target));
            }
            returned.push(target);
        }

        Err(GraphError::routing(
            from,
            format!("no outgoing edge matched (conditions returned {returned:?})"),
        ))
    }

    /// Run `node_ids` concurrently, each against its own copy of `state`.
    ///
    /// At most `max_concurrency` nodes run at once. Each node gets the normal
    /// retry policy. The first failure aborts the remaining nodes and the
    /// results of nodes that already succeeded are discarded.
    #[tracing::instrument(skip(self, node_ids, state), fields(graph_id = %self.id))]
    pub async fn execute_parallel<I, S>(
        &self,
        node_ids: I,
        state: &State,
    ) -> Result<HashMap<String, State>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = node_ids.into_iter().map(Into::into).collect();
        let nodes = ids
            .iter()
            .map(|id| {
                self.nodes
                    .get(id)
                    .cloned()
                    .ok_or_else(|| GraphError::Validation(format!("node '{id}' does not exist")))
            })
            .collect::<Result<Vec<Node>>>()?;

        let _guard = self.runtime.run_lock.lock().await;
        let token = CancellationToken::new();
        let _armed = self.runtime.arm(token.clone());
        self.runtime.history.lock().clear();

        let deadline = self.config.timeout().map(|t| Instant::now() + t);
        let permits = Arc::new(Semaphore::new(
            self.config.max_concurrency.unwrap_or(Semaphore::MAX_PERMITS).max(1),
        ));
        tracing::debug!(count = nodes.len(), "Starting parallel super-step");

        let mut tasks = JoinSet::new();
        for (step, node) in nodes.into_iter().enumerate() {
            let ctx = self.context(&node.id, step as i64, deadline, &token);
            let retry = self.config.retry.clone();
            let timeout = self.config.timeout();
            let permits = Arc::clone(&permits);
            let attempt_state = state.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let guarded = AssertUnwindSafe(run_node(
                    &node,
                    &retry,
                    ctx,
                    &attempt_state,
                    None,
                    timeout,
                ))
                .catch_unwind()
                .await;
                let run = guarded.unwrap_or_else(|panic| NodeRun {
                    attempts: 1,
                    duration: Duration::ZERO,
                    outcome: Err(panicked(&node.id, panic)),
                });
                let result = result_for(&node, step as i64, &run, &attempt_state);
                (node.id.clone(), run.outcome, result)
            });
        }

        let mut states = HashMap::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            let (id, outcome, result) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    tasks.abort_all();
                    return Err(GraphError::node_execution("parallel", 1, e));
                }
            };
            self.runtime.record(result);

            match outcome {
                Ok(next) => {
                    states.insert(id, next);
                }
                Err(failure) => {
                    tracing::warn!(node_id = %id, error = %failure.error, "Parallel node failed, aborting siblings");
                    tasks.abort_all();
                    return Err(failure.error);
                }
            }
        }

        Ok(states)
    }

    fn context(
        &self,
        node_id: &str,
        step: i64,
        deadline: Option<Instant>,
        token: &CancellationToken,
    ) -> ExecutionContext {
        ExecutionContext::new(
            self.id.clone(),
            self.config.thread_id.clone(),
            node_id,
            step,
            deadline,
            token.clone(),
        )
    }

    fn timeout_error(&self) -> GraphError {
        GraphError::Timeout {
            timeout: self.config.timeout().unwrap_or_default(),
        }
    }

    fn set_status(&self, status: ExecutionStatus) {
        *self.runtime.status.lock() = status;
    }
}

/// Run a node's step function with retries.
///
/// Every attempt receives a handle onto `state`, so partial mutations made by
/// a failed attempt are visible to the next one and to the caller.
async fn run_node(
    node: &Node,
    retry: &RetryPolicy,
    ctx: ExecutionContext,
    state: &State,
    last_node: Option<&str>,
    timeout: Option<Duration>,
) -> NodeRun {
    let started = Instant::now();
    let mut attempt: u32 = 1;

    loop {
        let outcome = (node.step)(ctx.clone().with_attempt(attempt), state.handle()).await;
        let err = match outcome {
            Ok(next) => {
                return NodeRun {
                    attempts: attempt,
                    duration: started.elapsed(),
                    outcome: Ok(next),
                }
            }
            Err(err) => err,
        };

        let retries_done = attempt - 1;
        if !retry.should_retry(retries_done) {
            tracing::warn!(node_id = %node.id, attempt, error = %err, "Node failed, no retries left");
            return NodeRun {
                attempts: attempt,
                duration: started.elapsed(),
                outcome: Err(StepFailure {
                    message: err.to_string(),
                    error: GraphError::node_execution(node.id.clone(), attempt, err),
                }),
            };
        }

        let delay = retry.delay_for(retries_done);
        tracing::warn!(node_id = %node.id, attempt, error = %err, ?delay, "Node failed, retrying");

        let interrupted = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => Some(GraphError::Cancelled {
                last_node: last_node.map(str::to_string),
            }),
            _ = until(ctx.deadline()) => Some(GraphError::Timeout {
                timeout: timeout.unwrap_or_default(),
            }),
            _ = tokio::time::sleep(delay) => None,
        };
        if let Some(error) = interrupted {
            return NodeRun {
                attempts: attempt,
                duration: started.elapsed(),
                outcome: Err(StepFailure {
                    message: err.to_string(),
                    error,
                }),
            };
        }
        attempt += 1;
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}

fn result_for(node: &Node, step: i64, run: &NodeRun, attempt_state: &State) -> ExecutionResult {
    let (success, error, state) = match &run.outcome {
        Ok(next) => (true, None, next.clone()),
        Err(failure) => (false, Some(failure.message.clone()), attempt_state.clone()),
    };
    ExecutionResult {
        node_id: node.id.clone(),
        step_index: step,
        attempts: run.attempts,
        success,
        error,
        duration: run.duration,
        timestamp: Utc::now(),
        state: Some(state),
    }
}

fn panicked(node_id: &str, panic: Box<dyn std::any::Any + Send>) -> StepFailure {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "step function panicked".to_string());
    StepFailure {
        error: GraphError::node_execution(node_id, 1, format!("panicked: {message}")),
        message,
    }
}
