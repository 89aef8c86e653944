//! # flowgraph-checkpoint - Durable State for Graph Execution
//!
//! **Pluggable checkpoint storage, a checkpoint manager, and time-travel
//! queries** for the flowgraph executor.
//!
//! ## Overview
//!
//! A checkpoint is a durable record of one execution thread's state, taken
//! after a node completes. Checkpoints enable:
//!
//! - **Time-travel debugging** - inspect state as of any earlier step
//! - **Replay** - resume execution from a stored checkpoint
//! - **Fault recovery** - continue a thread after a process restart
//!
//! ## Core Concepts
//!
//! ### 1. CheckpointStore Trait
//!
//! [`CheckpointStore`] is the capability every backend implements:
//! `save` (upsert), `load`, `list` (newest first), `delete` and `close`.
//! Four backends ship with the crate:
//!
//! | Backend | Type | Durability |
//! |---------|------|------------|
//! | `memory` | [`InMemoryCheckpointStore`] | process lifetime |
//! | `file` | [`FileCheckpointStore`] | one JSON document per checkpoint |
//! | `sqlite` | [`SqliteCheckpointStore`] | shared database, multi-process |
//! | `key_value` | [`KeyValueCheckpointStore`] | TTL-bound, in-process or Redis |
//!
//! ### 2. Backend Selection
//!
//! Backends are chosen by explicit configuration ([`StoreConfig`]) and built
//! with [`connect`]. Nothing is registered globally.
//!
//! ### 3. CheckpointManager
//!
//! [`CheckpointManager`] wraps an optional store with an enable switch and the
//! deterministic `"{node_id}-{step_index}"` id scheme. Saving without a store
//! is a no-op; loading without one fails with [`CheckpointError::Unavailable`].
//!
//! ### 4. Time Travel
//!
//! [`TimeTravel`] answers read-only questions over a manager: rewind to a
//! checkpoint, list history, find by step or by node.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowgraph_checkpoint::{connect, CheckpointManager, StateData, StoreConfig, TimeTravel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = connect(&StoreConfig::Sqlite {
//!         url: "sqlite:checkpoints.db".to_string(),
//!         max_connections: 5,
//!     })
//!     .await?;
//!
//!     let manager = CheckpointManager::new(store);
//!     manager
//!         .save_checkpoint("thread-1", "classify", 0, StateData::default())
//!         .await?;
//!
//!     let history = TimeTravel::new(manager).get_history("thread-1").await?;
//!     println!("{} checkpoints", history.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              flowgraph-core (Graph Executor)            │
//! │  • runs nodes, routes edges                             │
//! │  • saves a checkpoint after each completed step         │
//! └────────────────────┬────────────────────────────────────┘
//!                      │ save_checkpoint / load_checkpoint
//!                      ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │      CheckpointManager  ◄──────  TimeTravel (read-only) │
//! └────────────────────┬────────────────────────────────────┘
//!                      │ Option<Arc<dyn CheckpointStore>>
//!         ┌────────────┴──────┬──────────────┬──────────────┐
//!         ▼                   ▼              ▼              ▼
//!  ┌──────────────┐   ┌─────────────┐  ┌──────────┐  ┌─────────────┐
//!  │  In-Memory   │   │    File     │  │  SQLite  │  │  Key-Value  │
//!  └──────────────┘   └─────────────┘  └──────────┘  └─────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Every backend tolerates concurrent calls for distinct thread ids. Writes
//! within one thread are expected to be serialized by the caller; the
//! executor does this naturally by saving once per step.
//!
//! ## Module Organization
//!
//! - [`checkpoint`] - [`Checkpoint`], [`CheckpointMetadata`], [`StateData`]
//! - [`traits`] - [`CheckpointStore`]
//! - [`memory`], [`file`], [`sqlite`], [`kv`] - backends
//! - [`config`] - [`StoreConfig`] and [`connect`]
//! - [`manager`] - [`CheckpointManager`]
//! - [`time_travel`] - [`TimeTravel`]
//! - [`error`] - [`CheckpointError`]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod file;
pub mod kv;
pub mod manager;
pub mod memory;
pub mod sqlite;
pub mod time_travel;
pub mod traits;

pub use checkpoint::{newest_first, Checkpoint, CheckpointId, CheckpointMetadata, StateData};
pub use config::{connect, StoreConfig};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use kv::{InMemoryKeyValue, KeyValueCheckpointStore, KeyValueClient, DEFAULT_TTL};
#[cfg(feature = "redis")]
pub use kv::RedisKeyValue;
pub use manager::CheckpointManager;
pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use time_travel::TimeTravel;
pub use traits::CheckpointStore;
