//! Pluggable checkpoint storage capability
//!
//! This module defines the **[`CheckpointStore`]** trait, the abstraction every
//! persistence backend implements. The executor never talks to a backend
//! directly: it goes through a [`CheckpointManager`](crate::CheckpointManager),
//! which holds an optional `Arc<dyn CheckpointStore>` chosen by explicit
//! configuration at construction time.
//!
//! # Contract
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | `save`    | Idempotent upsert keyed by `(thread_id, id)` |
//! | `load`    | Exact lookup, [`CheckpointError::NotFound`] when absent |
//! | `list`    | Metadata for one thread, newest first |
//! | `delete`  | Removes one checkpoint, [`CheckpointError::NotFound`] when absent |
//! | `close`   | Releases backend resources |
//!
//! Backends must tolerate concurrent calls for distinct thread ids without
//! cross-thread interference. Writes within one thread are expected to be
//! serialized by the caller.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Graph executor                               │
//! │  • runs a node                                │
//! │  • calls manager.save_checkpoint()            │
//! └──────────────┬───────────────────────────────┘
//!                │ CheckpointManager
//!                ↓
//! ┌──────────────────────────────────────────────┐
//! │  dyn CheckpointStore                          │
//! │  ├── InMemoryCheckpointStore                  │
//! │  ├── FileCheckpointStore                      │
//! │  ├── SqliteCheckpointStore                    │
//! │  └── KeyValueCheckpointStore<C>               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Implementing a Custom Backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use flowgraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointStore, Result};
//!
//! struct MyStore { /* connection pool */ }
//!
//! #[async_trait]
//! impl CheckpointStore for MyStore {
//!     async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
//!         let doc = serde_json::to_string(checkpoint)?;
//!         // UPSERT doc under (checkpoint.thread_id, checkpoint.id)
//!         Ok(())
//!     }
//!
//!     async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
//!         // SELECT ... or Err(CheckpointError::not_found(thread_id, checkpoint_id))
//!         todo!()
//!     }
//!
//!     async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> { todo!() }
//!     async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> Result<()> { todo!() }
//!     async fn close(&self) -> Result<()> { Ok(()) }
//! }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::error::Result;
use async_trait::async_trait;

/// Durable save/load/list/delete of per-thread, per-step checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save a checkpoint, replacing any existing one with the same thread and id
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load a checkpoint by thread and id
    ///
    /// Returns [`CheckpointError::NotFound`](crate::CheckpointError::NotFound)
    /// when either the thread or the checkpoint is unknown.
    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Checkpoint>;

    /// List checkpoint metadata for a thread, newest first
    ///
    /// An unknown thread yields an empty list.
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>>;

    /// Delete a checkpoint
    ///
    /// Returns [`CheckpointError::NotFound`](crate::CheckpointError::NotFound)
    /// when there is nothing to delete.
    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> Result<()>;

    /// Release backend resources
    async fn close(&self) -> Result<()>;

    /// Short backend name used in logs
    fn backend(&self) -> &'static str;
}
