//! Graph model: nodes, edges, validation and topology
//!
//! A [`Graph`] is a set of [`Node`]s connected by [`Edge`]s, with one start
//! node and any number of end nodes. Edges may carry a condition that picks
//! the next node at runtime.
//!
//! # Graph Structure
//!
//! ```text
//!            ┌──────────┐
//!  start ──► │ classify │
//!            └────┬─────┘
//!      condition  │  condition
//!        ┌────────┴────────┐
//!        ▼                 ▼
//!   ┌─────────┐       ┌─────────┐
//!   │ answer  │       │ escalate│
//!   └────┬────┘       └────┬────┘
//!        └───────┬─────────┘
//!                ▼
//!           ┌─────────┐
//!           │ respond │  (end node)
//!           └─────────┘
//! ```
//!
//! # Routing
//!
//! After a node completes, the executor resolves the next node from the
//! node's outgoing edges in declaration order:
//!
//! | Outgoing edges                        | Next node                               |
//! |---------------------------------------|-----------------------------------------|
//! | none                                  | execution completes (implicit end)      |
//! | exactly one, unconditional            | its destination                         |
//! | otherwise, an unconditional edge      | its destination (first match wins)      |
//! | otherwise, a conditional edge         | its destination if the condition returns it |
//! | nothing matched / condition failed    | routing error                           |
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::{Graph, Node, State};
//! use serde_json::json;
//!
//! let mut graph = Graph::new("pipeline");
//! graph
//!     .add_node(Node::new("a", |_ctx, state: State| async move {
//!         state.set("y", json!(2));
//!         Ok(state)
//!     }))
//!     .add_node(Node::new("b", |_ctx, state: State| async move { Ok(state) }))
//!     .add_edge("a", "b")
//!     .set_start("a")
//!     .add_end("b");
//!
//! assert!(graph.validate().is_ok());
//! ```
//!
//! Validation is purely structural: the start node, every end node and every
//! edge endpoint must exist. Re-adding a node or edge under an existing id
//! replaces it; replaced edges keep their declaration position.

use crate::config::GraphConfig;
use crate::context::ExecutionContext;
use crate::error::{BoxError, GraphError, Result};
use crate::state::{State, StateValue};
use crate::stream::{ExecutionResult, ResultQueue};
use flowgraph_checkpoint::CheckpointManager;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Future returned by a step function
pub type StepFuture = BoxFuture<'static, std::result::Result<State, BoxError>>;

/// Step function: `(context, state) -> state`
pub type StepFn = Arc<dyn Fn(ExecutionContext, State) -> StepFuture + Send + Sync>;

/// Edge condition: returns the id of the node to go to next
pub type ConditionFn =
    Arc<dyn Fn(&ExecutionContext, &State) -> std::result::Result<String, BoxError> + Send + Sync>;

/// One unit of computation
#[derive(Clone)]
pub struct Node {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) step: StepFn,
    pub(crate) metadata: HashMap<String, StateValue>,
}

impl Node {
    /// Node running `step`; the display name defaults to the id
    pub fn new<F, Fut>(id: impl Into<String>, step: F) -> Self
    where
        F: Fn(ExecutionContext, State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<State, BoxError>> + Send + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step: Arc::new(move |ctx, state| step(ctx, state).boxed()),
            metadata: HashMap::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &HashMap<String, StateValue> {
        &self.metadata
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("step", &"<function>")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Transition between two nodes, optionally gated by a condition
#[derive(Clone)]
pub struct Edge {
    pub(crate) id: String,
    pub(crate) from: String,
    pub(crate) to: String,
    pub(crate) condition: Option<ConditionFn>,
    pub(crate) metadata: HashMap<String, StateValue>,
}

impl Edge {
    /// Unconditional edge; its id is `"{from}->{to}"`
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{from}->{to}"),
            from,
            to,
            condition: None,
            metadata: HashMap::new(),
        }
    }

    /// Edge taken only when `condition` returns `to`
    pub fn conditional<F>(from: impl Into<String>, to: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&ExecutionContext, &State) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    {
        Self::new(from, to).with_condition_fn(Arc::new(condition))
    }

    pub(crate) fn with_condition_fn(mut self, condition: ConditionFn) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    pub fn metadata(&self) -> &HashMap<String, StateValue> {
        &self.metadata
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("condition", &self.condition.as_ref().map(|_| "<function>"))
            .finish()
    }
}

/// Terminal and intermediate states of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Validated,
    Running,
    Completed,
    Cancelled,
    TimedOut,
    MaxIterationsExceeded,
    NodeError,
    RoutingError,
    StorageError,
}

impl ExecutionStatus {
    /// Terminal status for an execution that stopped with `error`
    pub fn from_error(error: &GraphError) -> Self {
        match error {
            GraphError::Cancelled { .. } => ExecutionStatus::Cancelled,
            GraphError::Timeout { .. } => ExecutionStatus::TimedOut,
            GraphError::MaxIterationsExceeded { .. } => ExecutionStatus::MaxIterationsExceeded,
            GraphError::NodeExecution { .. } => ExecutionStatus::NodeError,
            GraphError::Routing { .. } => ExecutionStatus::RoutingError,
            GraphError::Checkpoint(_) => ExecutionStatus::StorageError,
            GraphError::Validation(_) | GraphError::State(_) | GraphError::Config(_) => {
                ExecutionStatus::Idle
            }
        }
    }

    /// Whether an execution in this status has finished
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ExecutionStatus::Idle | ExecutionStatus::Validated | ExecutionStatus::Running
        )
    }
}

/// Mutable execution bookkeeping shared between `execute` and `interrupt`
#[derive(Debug)]
pub(crate) struct Runtime {
    pub(crate) current_state: Mutex<State>,
    pub(crate) history: Mutex<Vec<ExecutionResult>>,
    pub(crate) status: Mutex<ExecutionStatus>,
    cancel: Mutex<CancelSlot>,
    pub(crate) run_lock: tokio::sync::Mutex<()>,
    pub(crate) results: ResultQueue,
}

impl Runtime {
    fn new(result_buffer: usize) -> Self {
        Self {
            current_state: Mutex::new(State::new()),
            history: Mutex::new(Vec::new()),
            status: Mutex::new(ExecutionStatus::Idle),
            cancel: Mutex::new(CancelSlot {
                token: CancellationToken::new(),
                pending: false,
            }),
            run_lock: tokio::sync::Mutex::new(()),
            results: ResultQueue::new(result_buffer),
        }
    }

    /// Cancel the installed token and remember the request for the next
    /// execution that arms itself before this one is disarmed
    pub(crate) fn interrupt(&self) {
        let mut slot = self.cancel.lock();
        slot.pending = true;
        slot.token.cancel();
    }

    /// Install the token of the execution that is starting
    ///
    /// A pending interrupt cancels it straight away. The request is dropped
    /// when the returned guard goes out of scope.
    pub(crate) fn arm(&self, token: CancellationToken) -> Armed<'_> {
        let mut slot = self.cancel.lock();
        if slot.pending {
            token.cancel();
        }
        slot.token = token;
        Armed { runtime: self }
    }

    /// Append to the history and offer to the result queue
    pub(crate) fn record(&self, result: ExecutionResult) {
        self.history.lock().push(result.clone());
        self.results.try_publish(result);
    }
}

#[derive(Debug)]
struct CancelSlot {
    token: CancellationToken,
    pending: bool,
}

/// Clears a pending interrupt once the armed execution has finished
pub(crate) struct Armed<'a> {
    runtime: &'a Runtime,
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.runtime.cancel.lock().pending = false;
    }
}

/// Workflow graph and its executor
///
/// Build the graph with the `add_*` methods, then run it with
/// [`execute`](Graph::execute). A graph runs one execution at a time;
/// concurrent calls queue behind each other. Share it behind an `Arc` to
/// call [`interrupt`](Graph::interrupt) from another task.
#[derive(Debug)]
pub struct Graph {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) nodes: HashMap<String, Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) start: Option<String>,
    pub(crate) end_nodes: BTreeSet<String>,
    pub(crate) config: GraphConfig,
    pub(crate) checkpoints: CheckpointManager,
    pub(crate) runtime: Runtime,
}

impl Graph {
    /// Empty graph with default configuration and no checkpoint store
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let config = GraphConfig::default();
        Self {
            name: id.clone(),
            id,
            nodes: HashMap::new(),
            edges: Vec::new(),
            start: None,
            end_nodes: BTreeSet::new(),
            runtime: Runtime::new(config.result_buffer),
            config,
            checkpoints: CheckpointManager::without_store(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the configuration.
    ///
    /// Recreates the result queue with the configured capacity, so call this
    /// before [`subscribe`](Graph::subscribe).
    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.runtime = Runtime::new(config.result_buffer);
        self.config = config;
        self
    }

    /// Persist a checkpoint after each completed step through `manager`
    pub fn with_checkpoint_manager(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = manager;
        self
    }

    /// Add a node, replacing any node with the same id
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        if self.nodes.insert(node.id.clone(), node).is_some() {
            tracing::debug!(graph_id = %self.id, "Replaced existing node");
        }
        self
    }

    /// Add an unconditional edge
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.insert_edge(Edge::new(from, to))
    }

    /// Add an edge taken when `condition` returns `to`
    pub fn add_conditional_edge<F>(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> &mut Self
    where
        F: Fn(&ExecutionContext, &State) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    {
        self.insert_edge(Edge::conditional(from, to, condition))
    }

    /// Add one conditional edge per target, all sharing `condition`.
    ///
    /// The condition's return value selects among `targets`.
    pub fn add_conditional_edges<I, S, F>(
        &mut self,
        from: impl Into<String>,
        targets: I,
        condition: F,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&ExecutionContext, &State) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    {
        let from = from.into();
        let condition: ConditionFn = Arc::new(condition);
        for target in targets {
            let edge = Edge::new(from.clone(), target).with_condition_fn(Arc::clone(&condition));
            self.insert_edge(edge);
        }
        self
    }

    /// Add an edge, replacing an edge with the same id in place
    pub fn insert_edge(&mut self, edge: Edge) -> &mut Self {
        match self.edges.iter_mut().find(|e| e.id == edge.id) {
            Some(existing) => *existing = edge,
            None => self.edges.push(edge),
        }
        self
    }

    /// Set the node execution starts at
    pub fn set_start(&mut self, node_id: impl Into<String>) -> &mut Self {
        self.start = Some(node_id.into());
        self
    }

    /// Mark a node as an end node
    pub fn add_end(&mut self, node_id: impl Into<String>) -> &mut Self {
        self.end_nodes.insert(node_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges in declaration order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn is_end(&self, node_id: &str) -> bool {
        self.end_nodes.contains(node_id)
    }

    /// Outgoing edges of `node_id` in declaration order
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Copy of the working state of the current or last execution
    pub fn current_state(&self) -> State {
        self.runtime.current_state.lock().clone()
    }

    /// Copy of the execution history of the current or last execution
    pub fn execution_history(&self) -> Vec<ExecutionResult> {
        self.runtime.history.lock().clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.runtime.status.lock()
    }

    /// Take the stream of execution results.
    ///
    /// Only the first call returns a stream. Delivery is at-most-once: results
    /// published while the buffer is full are dropped.
    pub fn subscribe(&self) -> Option<ReceiverStream<ExecutionResult>> {
        self.runtime.results.subscribe()
    }

    /// Results dropped because the stream buffer was full
    pub fn dropped_results(&self) -> u64 {
        self.runtime.results.dropped()
    }

    /// Check the start node, end nodes and edge endpoints all exist
    pub fn validate(&self) -> Result<()> {
        let start = self
            .start
            .as_deref()
            .ok_or_else(|| GraphError::Validation("start node is not set".to_string()))?;
        if !self.nodes.contains_key(start) {
            return Err(GraphError::Validation(format!(
                "start node '{start}' does not exist"
            )));
        }

        if let Some(end) = self.end_nodes.iter().find(|id| !self.nodes.contains_key(*id)) {
            return Err(GraphError::Validation(format!(
                "end node '{end}' does not exist"
            )));
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(GraphError::Validation(format!(
                        "edge '{}' references unknown node '{endpoint}'",
                        edge.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Read-only projection of the graph structure
    pub fn topology(&self) -> Topology {
        let mut nodes: Vec<TopologyNode> = self
            .nodes
            .values()
            .map(|node| TopologyNode {
                id: node.id.clone(),
                name: node.name.clone(),
                is_start: self.start.as_deref() == Some(node.id.as_str()),
                is_end: self.end_nodes.contains(&node.id),
                metadata: node.metadata.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut adjacency: BTreeMap<String, Vec<String>> = self
            .nodes
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        for edge in &self.edges {
            adjacency.entry(edge.from.clone()).or_default().push(edge.to.clone());
        }

        Topology {
            graph_id: self.id.clone(),
            name: self.name.clone(),
            start: self.start.clone(),
            end_nodes: self.end_nodes.iter().cloned().collect(),
            nodes,
            edges: self
                .edges
                .iter()
                .map(|edge| TopologyEdge {
                    id: edge.id.clone(),
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    conditional: edge.is_conditional(),
                    metadata: edge.metadata.clone(),
                })
                .collect(),
            adjacency,
        }
    }
}

/// Serializable view of a graph for visualisation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
    pub graph_id: String,
    pub name: String,
    pub start: Option<String>,
    pub end_nodes: Vec<String>,
    /// Sorted by id
    pub nodes: Vec<TopologyNode>,
    /// Declaration order
    pub edges: Vec<TopologyEdge>,
    /// Destinations per node in declaration order
    pub adjacency: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyNode {
    pub id: String,
    pub name: String,
    pub is_start: bool,
    pub is_end: bool,
    pub metadata: HashMap<String, StateValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub conditional: bool,
    pub metadata: HashMap<String, StateValue>,
}
