//! SQLite checkpoint store
//!
//! Persists checkpoints in a single `checkpoints` table so several processes
//! can share one database file:
//!
//! ```text
//! checkpoints
//! ├── id          TEXT     ┐ primary key
//! ├── thread_id   TEXT     ┘ (indexed)
//! ├── state_data  TEXT     JSON {"data":..., "metadata":...}
//! ├── metadata    TEXT     JSON object
//! ├── created_at  TEXT     RFC 3339, nanosecond precision (indexed)
//! ├── node_id     TEXT
//! └── step_id     INTEGER
//! ```
//!
//! Timestamps are written with a fixed nanosecond width so that text order and
//! chronological order agree.

use crate::{
    checkpoint::{Checkpoint, CheckpointMetadata, StateData},
    error::{CheckpointError, Result},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS checkpoints (
        id TEXT NOT NULL,
        thread_id TEXT NOT NULL,
        state_data TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL,
        node_id TEXT NOT NULL,
        step_id INTEGER NOT NULL,
        PRIMARY KEY (thread_id, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread_id ON checkpoints (thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_created_at ON checkpoints (created_at)",
];

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    id: String,
    thread_id: String,
    state_data: String,
    metadata: String,
    created_at: String,
    node_id: String,
    step_id: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MetadataRow {
    id: String,
    thread_id: String,
    metadata: String,
    created_at: String,
    node_id: String,
    step_id: i64,
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Invalid(format!("bad created_at '{raw}': {e}")))
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = CheckpointError;

    fn try_from(row: CheckpointRow) -> Result<Self> {
        let state: StateData = serde_json::from_str(&row.state_data)?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&row.metadata)?;
        Ok(Checkpoint {
            id: row.id,
            thread_id: row.thread_id,
            state,
            metadata,
            created_at: parse_timestamp(&row.created_at)?,
            node_id: row.node_id,
            step_index: row.step_id,
        })
    }
}

impl TryFrom<MetadataRow> for CheckpointMetadata {
    type Error = CheckpointError;

    fn try_from(row: MetadataRow) -> Result<Self> {
        Ok(CheckpointMetadata {
            id: row.id,
            thread_id: row.thread_id,
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: parse_timestamp(&row.created_at)?,
            node_id: row.node_id,
            step_index: row.step_id,
        })
    }
}

/// Checkpoint store backed by a SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Connect to `database_url` (e.g. `sqlite:checkpoints.db` or
    /// `sqlite::memory:`) and create the schema if it is missing
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Each connection to `:memory:` is its own database, so keep exactly one alive.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.create_schema().await?;
        tracing::debug!(database_url, "Connected SQLite checkpoint store");
        Ok(store)
    }

    /// Wrap an existing pool; the schema is created if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let state_data = serde_json::to_string(&checkpoint.state)?;
        let metadata = serde_json::to_string(&checkpoint.metadata)?;

        sqlx::query(
            "INSERT INTO checkpoints (id, thread_id, state_data, metadata, created_at, node_id, step_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(thread_id, id) DO UPDATE SET
                state_data = excluded.state_data,
                metadata = excluded.metadata,
                created_at = excluded.created_at,
                node_id = excluded.node_id,
                step_id = excluded.step_id",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.thread_id)
        .bind(&state_data)
        .bind(&metadata)
        .bind(format_timestamp(&checkpoint.created_at))
        .bind(&checkpoint.node_id)
        .bind(checkpoint.step_index)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.id,
            "Saved checkpoint row"
        );
        Ok(())
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT id, thread_id, state_data, metadata, created_at, node_id, step_id
             FROM checkpoints WHERE thread_id = ? AND id = ?",
        )
        .bind(thread_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CheckpointError::not_found(thread_id, checkpoint_id))?;

        row.try_into()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        let rows = sqlx::query_as::<_, MetadataRow>(
            "SELECT id, thread_id, metadata, created_at, node_id, step_id
             FROM checkpoints WHERE thread_id = ?
             ORDER BY created_at DESC, step_id DESC, id DESC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CheckpointMetadata::try_from).collect()
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ? AND id = ?")
            .bind(thread_id)
            .bind(checkpoint_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::not_found(thread_id, checkpoint_id));
        }
        tracing::debug!(thread_id, checkpoint_id, "Deleted checkpoint row");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
