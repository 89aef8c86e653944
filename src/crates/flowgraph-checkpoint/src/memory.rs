//! In-memory checkpoint store
//!
//! Stores checkpoints in a nested map (`thread -> id -> checkpoint`) guarded by
//! an async read/write lock. Every save and load clones the checkpoint, so no
//! caller ever holds a reference into the store. Contents live only as long as
//! the process.

use crate::{
    checkpoint::{newest_first, Checkpoint, CheckpointMetadata},
    error::{CheckpointError, Result},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type CheckpointStorage = Arc<RwLock<HashMap<String, HashMap<String, Checkpoint>>>>;

/// Process-lifetime checkpoint store, mainly for tests and short-lived runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .filter(|entries| !entries.is_empty())
            .count()
    }

    /// Total number of stored checkpoints
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Remove everything
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage
            .entry(checkpoint.thread_id.clone())
            .or_default()
            .insert(checkpoint.id.clone(), checkpoint.clone());

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.id,
            "Saved checkpoint in memory"
        );
        Ok(())
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        let storage = self.storage.read().await;
        storage
            .get(thread_id)
            .and_then(|entries| entries.get(checkpoint_id))
            .cloned()
            .ok_or_else(|| CheckpointError::not_found(thread_id, checkpoint_id))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        let storage = self.storage.read().await;
        let mut results: Vec<CheckpointMetadata> = storage
            .get(thread_id)
            .map(|entries| entries.values().map(Checkpoint::to_metadata).collect())
            .unwrap_or_default();

        results.sort_by(newest_first);
        Ok(results)
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        let entries = storage
            .get_mut(thread_id)
            .ok_or_else(|| CheckpointError::not_found(thread_id, checkpoint_id))?;

        entries
            .remove(checkpoint_id)
            .ok_or_else(|| CheckpointError::not_found(thread_id, checkpoint_id))?;

        if entries.is_empty() {
            storage.remove(thread_id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Clones share the map, so closing one handle leaves the data alone
        tracing::debug!("In-memory checkpoint store closed");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StateData;
    use serde_json::json;

    fn checkpoint(thread: &str, id: &str, step: i64) -> Checkpoint {
        let mut state = StateData::default();
        state.data.insert("step".to_string(), json!(step));
        Checkpoint::new(thread, id, "node", step, state)
    }

    #[tokio::test]
    async fn test_save_and_load_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        let cp = checkpoint("thread-1", "cp-1", 1);

        store.save(&cp).await.unwrap();
        let loaded = store.load("thread-1", "cp-1").await.unwrap();

        assert_eq!(loaded, cp);
    }

    #[tokio::test]
    async fn test_loaded_copy_is_detached() {
        let store = InMemoryCheckpointStore::new();
        store.save(&checkpoint("thread-1", "cp-1", 1)).await.unwrap();

        let mut loaded = store.load("thread-1", "cp-1").await.unwrap();
        loaded.state.data.insert("step".to_string(), json!(99));

        let again = store.load("thread-1", "cp-1").await.unwrap();
        assert_eq!(again.state.data["step"], json!(1));
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let store = InMemoryCheckpointStore::new();
        store.save(&checkpoint("thread-1", "cp-1", 1)).await.unwrap();
        store.save(&checkpoint("thread-1", "cp-1", 2)).await.unwrap();

        assert_eq!(store.checkpoint_count().await, 1);
        let loaded = store.load("thread-1", "cp-1").await.unwrap();
        assert_eq!(loaded.step_index, 2);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = InMemoryCheckpointStore::new();
        let err = store.delete("nope", "cp-1").await.unwrap_err();
        assert!(err.is_not_found());

        store.save(&checkpoint("thread-1", "cp-1", 1)).await.unwrap();
        let err = store.delete("thread-1", "cp-2").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_last_checkpoint_drops_thread() {
        let store = InMemoryCheckpointStore::new();
        store.save(&checkpoint("thread-1", "cp-1", 1)).await.unwrap();
        assert_eq!(store.thread_count().await, 1);

        store.delete("thread-1", "cp-1").await.unwrap();
        assert_eq!(store.thread_count().await, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryCheckpointStore::new();
        store.save(&checkpoint("thread-1", "cp-1", 1)).await.unwrap();
        store.save(&checkpoint("thread-2", "cp-1", 1)).await.unwrap();
        assert_eq!(store.checkpoint_count().await, 2);

        store.clear().await;
        assert_eq!(store.checkpoint_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_keeps_data_for_other_handles() {
        let store = InMemoryCheckpointStore::new();
        let shared: Arc<dyn CheckpointStore> = Arc::new(store.clone());
        store.save(&checkpoint("thread-1", "cp-1", 1)).await.unwrap();

        shared.close().await.unwrap();

        let loaded = store.load("thread-1", "cp-1").await.unwrap();
        assert_eq!(loaded.step_index, 1);
        assert_eq!(shared.list("thread-1").await.unwrap().len(), 1);
    }
}
