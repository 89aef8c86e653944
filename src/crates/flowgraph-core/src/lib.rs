//! # flowgraph-core - Workflow graphs with durable state
//!
//! `flowgraph-core` executes directed graphs of async step functions over a
//! shared, snapshot-able state, with retries, conditional routing, bounded
//! parallel fan-out, cooperative cancellation and per-step checkpoints.
//!
//! ## Overview
//!
//! - **State container** - [`State`]: key/value data plus metadata behind a
//!   read/write lock, with deep-copy clones and a bounded snapshot history
//! - **Graph model** - [`Graph`], [`Node`], [`Edge`]: structural validation
//!   and a serializable [`Topology`] for visualisers
//! - **Executor** - [`Graph::execute`]: sequential loop with per-node
//!   [`RetryPolicy`], an iteration bound and an overall deadline
//! - **Super-steps** - [`Graph::execute_parallel`]: fail-fast fan-out over
//!   independent state copies, limited by `max_concurrency`
//! - **Result streaming** - [`Graph::subscribe`]: bounded, drop-on-full
//!   stream of [`ExecutionResult`]s
//! - **Checkpointing** - one checkpoint per completed step through
//!   [`flowgraph_checkpoint::CheckpointManager`], and
//!   [`Graph::resume_from_checkpoint`] to continue from any of them
//!
//! ## Execution States
//!
//! ```text
//! Idle ──validate──► Validated ──► Running ──┬──► Completed
//!                                            ├──► Cancelled
//!                                            ├──► TimedOut
//!                                            ├──► MaxIterationsExceeded
//!                                            ├──► NodeError
//!                                            ├──► RoutingError
//!                                            └──► StorageError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgraph_core::{Graph, Node, State};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut graph = Graph::new("linear");
//! graph
//!     .add_node(Node::new("a", |_ctx, state: State| async move {
//!         state.set("y", json!(2));
//!         Ok(state)
//!     }))
//!     .add_node(Node::new("b", |_ctx, state: State| async move {
//!         state.set("z", json!(3));
//!         Ok(state)
//!     }))
//!     .add_edge("a", "b")
//!     .set_start("a")
//!     .add_end("b");
//!
//! let initial = State::new();
//! initial.set("x", json!(1));
//!
//! let report = graph.execute(&initial).await.unwrap();
//! assert_eq!(report.state.get("z"), Some(json!(3)));
//! assert_eq!(report.history.len(), 2);
//! # }
//! ```
//!
//! ## Checkpointing
//!
//! ```rust,no_run
//! use flowgraph_checkpoint::{CheckpointManager, InMemoryCheckpointStore};
//! use flowgraph_core::{Graph, GraphConfig};
//! use std::sync::Arc;
//!
//! let manager = CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new()));
//! let graph = Graph::new("durable")
//!     .with_config(GraphConfig::default().with_thread_id("session-42"))
//!     .with_checkpoint_manager(manager);
//! ```
//!
//! Checkpoint ids are `"{node_id}-{step_index}"`, so re-running a step
//! overwrites its checkpoint. [`flowgraph_checkpoint::TimeTravel`] queries
//! them afterwards.
//!
//! ## Configuration
//!
//! [`EngineConfig`] loads graph, checkpoint and logging settings from YAML or
//! TOML with `${ENV:default}` expansion; see [`config`].

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod retry;
pub mod state;
pub mod stream;

pub use config::{EngineConfig, GraphConfig};
pub use context::ExecutionContext;
pub use error::{BoxError, GraphError, Result, StateError};
pub use executor::{ExecutionFailure, ExecutionReport};
pub use graph::{
    ConditionFn, Edge, ExecutionStatus, Graph, Node, StepFn, StepFuture, Topology, TopologyEdge,
    TopologyNode,
};
pub use logging::{init_logging, LoggingConfig};
pub use retry::RetryPolicy;
pub use state::{State, StateSnapshot, StateValue, DEFAULT_HISTORY_CAPACITY};
pub use stream::{ExecutionResult, ResultQueue};

pub use flowgraph_checkpoint;
