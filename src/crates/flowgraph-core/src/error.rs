//! Error types for graph construction and execution
//!
//! All errors implement `std::error::Error` via `thiserror`.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation             - malformed topology, raised before any node runs
//! ├── NodeExecution          - step function failed after all retries
//! ├── Routing                - no outgoing edge resolved a next node
//! ├── Cancelled              - cooperative interrupt observed
//! ├── Timeout                - execution deadline passed
//! ├── MaxIterationsExceeded  - loop bound reached
//! ├── Checkpoint             - checkpoint backend failure or missing checkpoint
//! ├── State                  - state (de)serialization failure
//! └── Config                 - configuration loading failure
//! ```
//!
//! Step functions and edge conditions report failures as [`BoxError`], so any
//! error type converts with `?` or `.into()`:
//!
//! ```rust
//! use flowgraph_core::error::BoxError;
//!
//! fn parse_count(raw: &str) -> Result<i64, BoxError> {
//!     Ok(raw.parse::<i64>()?)
//! }
//!
//! assert!(parse_count("nope").is_err());
//! ```
//!
//! # Propagation
//!
//! Validation errors abort before execution starts. Node, routing and
//! checkpoint errors abort the running execution; the caller still gets the
//! best-known state and history through
//! [`ExecutionFailure`](crate::executor::ExecutionFailure). There is no
//! workflow-level retry beyond the per-node [`RetryPolicy`](crate::retry::RetryPolicy).

use flowgraph_checkpoint::CheckpointError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by step functions and edge conditions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors from graph validation and execution
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure validation failed
    ///
    /// Raised by `validate()` when the start node, an end node, or an edge
    /// endpoint does not exist. Never raised mid-execution.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A step function kept failing until its retries ran out
    #[error("Node '{node}' failed after {attempts} attempt(s): {source}")]
    NodeExecution {
        /// Node that failed
        node: String,
        /// Attempts made, including the first
        attempts: u32,
        /// Error from the last attempt
        source: BoxError,
    },

    /// No outgoing edge of `node` resolved a next node
    #[error("Routing from node '{node}' failed: {reason}")]
    Routing {
        /// Node whose outgoing edges were evaluated
        node: String,
        /// What went wrong
        reason: String,
    },

    /// Execution was interrupted between node executions
    #[error("Execution cancelled{}", .last_node.as_ref().map(|n| format!(" after node '{n}'")).unwrap_or_default())]
    Cancelled {
        /// Last node that completed before cancellation was observed
        last_node: Option<String>,
    },

    /// Execution deadline passed
    #[error("Execution timed out after {timeout:?}")]
    Timeout {
        /// Configured deadline
        timeout: Duration,
    },

    /// The loop bound was reached before an end node
    #[error("Execution exceeded the maximum of {limit} iterations")]
    MaxIterationsExceeded {
        /// Configured bound
        limit: usize,
    },

    /// Checkpoint backend error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// State error
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GraphError {
    /// Create a node execution error
    pub fn node_execution(node: impl Into<String>, attempts: u32, source: impl Into<BoxError>) -> Self {
        GraphError::NodeExecution {
            node: node.into(),
            attempts,
            source: source.into(),
        }
    }

    /// Create a routing error
    pub fn routing(node: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::Routing {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the checkpoint layer
    pub fn is_storage(&self) -> bool {
        matches!(self, GraphError::Checkpoint(_))
    }
}

/// Errors from the state container
#[derive(Error, Debug)]
pub enum StateError {
    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A snapshot could not be applied
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
