//! Execution result records and the bounded result queue
//!
//! Every node execution produces an [`ExecutionResult`]. The executor appends
//! it to the graph's execution history and offers it to a fixed-capacity
//! queue that observers can consume as a stream:
//!
//! ```text
//! executor ──try_publish──► [ r1 r2 r3 ... rN ] ──► ReceiverStream ──► observer
//!                  │                full?
//!                  └──────────► dropped (counted, traced)
//! ```
//!
//! Publishing never waits. When the queue is full the result is dropped, so
//! delivery is at-most-once with no replay. The execution history is the
//! complete record.

use crate::state::State;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;

/// Outcome of one node execution (after retries)
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Node that ran
    pub node_id: String,
    /// Step index of the execution
    pub step_index: i64,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Whether the node finally succeeded
    pub success: bool,
    /// Error of the last attempt when unsuccessful
    pub error: Option<String>,
    /// Time spent in the node, retries included
    pub duration: Duration,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Copy of the state the node produced (the partially mutated state on failure)
    pub state: Option<State>,
}

/// Fixed-capacity, drop-on-full queue of [`ExecutionResult`]s
#[derive(Debug)]
pub struct ResultQueue {
    tx: mpsc::Sender<ExecutionResult>,
    rx: Mutex<Option<mpsc::Receiver<ExecutionResult>>>,
    dropped: AtomicU64,
}

impl ResultQueue {
    /// Create a queue holding at most `capacity` results (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Offer a result without waiting; returns whether it was queued
    pub fn try_publish(&self, result: ExecutionResult) -> bool {
        match self.tx.try_send(result) {
            Ok(()) => true,
            Err(TrySendError::Full(result)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(node_id = %result.node_id, "Result queue full, dropping result");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Take the consuming end of the queue.
    ///
    /// Only the first call returns a stream.
    pub fn subscribe(&self) -> Option<ReceiverStream<ExecutionResult>> {
        self.rx.lock().take().map(ReceiverStream::new)
    }

    /// Number of results dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn result(node: &str) -> ExecutionResult {
        ExecutionResult {
            node_id: node.to_string(),
            step_index: 0,
            attempts: 1,
            success: true,
            error: None,
            duration: Duration::from_millis(1),
            timestamp: Utc::now(),
            state: None,
        }
    }

    #[tokio::test]
    async fn test_drops_when_full() {
        let queue = ResultQueue::new(2);
        assert!(queue.try_publish(result("a")));
        assert!(queue.try_publish(result("b")));
        assert!(!queue.try_publish(result("c")));
        assert_eq!(queue.dropped(), 1);

        let mut stream = queue.subscribe().unwrap();
        assert_eq!(stream.next().await.unwrap().node_id, "a");
        assert_eq!(stream.next().await.unwrap().node_id, "b");
    }

    #[test]
    fn test_subscribe_once() {
        let queue = ResultQueue::new(1);
        assert!(queue.subscribe().is_some());
        assert!(queue.subscribe().is_none());
    }

    #[test]
    fn test_publish_after_subscriber_dropped() {
        let queue = ResultQueue::new(1);
        drop(queue.subscribe());
        assert!(!queue.try_publish(result("a")));
        assert_eq!(queue.dropped(), 0);
    }
}
