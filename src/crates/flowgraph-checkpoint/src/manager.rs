//! Checkpoint manager
//!
//! The executor's single entry point into checkpointing. It wraps an optional
//! store, adds an enable switch, and derives checkpoint ids from the node and
//! step that produced them:
//!
//! ```text
//! save_checkpoint("t1", "classify", 3, state)  ->  id "classify-3"
//! ```
//!
//! Re-running the same step therefore overwrites its checkpoint instead of
//! accumulating a new one.
//!
//! | Situation              | save               | load / list / delete   |
//! |------------------------|--------------------|------------------------|
//! | store, enabled         | persists, errors propagate | store result   |
//! | store, disabled        | no-op, `Ok(None)`  | store result           |
//! | no store               | no-op, `Ok(None)`  | `Err(Unavailable)`     |

use crate::{
    checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata, StateData},
    error::{CheckpointError, Result},
    traits::CheckpointStore,
};
use std::sync::Arc;

/// Enable switch and id scheme over an optional [`CheckpointStore`]
#[derive(Clone)]
pub struct CheckpointManager {
    store: Option<Arc<dyn CheckpointStore>>,
    enabled: bool,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("backend", &self.store.as_ref().map(|s| s.backend()))
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::without_store()
    }
}

impl CheckpointManager {
    /// Manager over `store`, enabled
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store: Some(store),
            enabled: true,
        }
    }

    /// Manager with no store: saves are no-ops, reads fail with
    /// [`CheckpointError::Unavailable`]
    pub fn without_store() -> Self {
        Self {
            store: None,
            enabled: true,
        }
    }

    /// Set the enable switch
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Toggle checkpoint writes
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether saves reach the store
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.store.is_some()
    }

    /// Configured store, if any
    pub fn store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.store.as_ref()
    }

    /// Deterministic checkpoint id for a node and step
    pub fn checkpoint_id(node_id: &str, step_index: i64) -> CheckpointId {
        format!("{node_id}-{step_index}")
    }

    fn require_store(&self) -> Result<&Arc<dyn CheckpointStore>> {
        self.store.as_ref().ok_or(CheckpointError::Unavailable)
    }

    /// Persist `state` as the checkpoint for `(node_id, step_index)`
    ///
    /// Returns the checkpoint id, or `None` when checkpointing is disabled or
    /// no store is configured.
    pub async fn save_checkpoint(
        &self,
        thread_id: &str,
        node_id: &str,
        step_index: i64,
        state: StateData,
    ) -> Result<Option<CheckpointId>> {
        let store = match (&self.store, self.enabled) {
            (Some(store), true) => store,
            _ => return Ok(None),
        };

        let id = Self::checkpoint_id(node_id, step_index);
        let checkpoint = Checkpoint::new(thread_id, id.clone(), node_id, step_index, state);
        store.save(&checkpoint).await?;

        tracing::debug!(
            thread_id,
            checkpoint_id = %id,
            backend = store.backend(),
            "Checkpoint saved"
        );
        Ok(Some(id))
    }

    /// Load a checkpoint
    pub async fn load_checkpoint(&self, thread_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        self.require_store()?.load(thread_id, checkpoint_id).await
    }

    /// List a thread's checkpoints, newest first
    pub async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        self.require_store()?.list(thread_id).await
    }

    /// Delete a checkpoint
    pub async fn delete_checkpoint(&self, thread_id: &str, checkpoint_id: &str) -> Result<()> {
        self.require_store()?.delete(thread_id, checkpoint_id).await
    }

    /// Most recent checkpoint of a thread, if any
    pub async fn latest_checkpoint(&self, thread_id: &str) -> Result<Option<CheckpointMetadata>> {
        Ok(self.list_checkpoints(thread_id).await?.into_iter().next())
    }

    /// Close the underlying store
    pub async fn close(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCheckpointStore;
    use serde_json::json;
    use std::collections::HashMap;

    fn state(value: i64) -> StateData {
        let mut data = HashMap::new();
        data.insert("v".to_string(), json!(value));
        StateData::new(data, HashMap::new())
    }

    #[tokio::test]
    async fn test_save_uses_node_step_id() {
        let manager = CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new()));
        let id = manager
            .save_checkpoint("t1", "classify", 3, state(1))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("classify-3"));

        let loaded = manager.load_checkpoint("t1", "classify-3").await.unwrap();
        assert_eq!(loaded.node_id, "classify");
        assert_eq!(loaded.step_index, 3);
        assert_eq!(loaded.state, state(1));
    }

    #[tokio::test]
    async fn test_rerun_step_overwrites() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let manager = CheckpointManager::new(store.clone());
        manager.save_checkpoint("t1", "a", 0, state(1)).await.unwrap();
        manager.save_checkpoint("t1", "a", 0, state(2)).await.unwrap();

        assert_eq!(store.checkpoint_count().await, 1);
        let loaded = manager.load_checkpoint("t1", "a-0").await.unwrap();
        assert_eq!(loaded.state, state(2));
    }

    #[tokio::test]
    async fn test_without_store() {
        let manager = CheckpointManager::without_store();
        assert!(!manager.is_enabled());
        assert_eq!(
            manager.save_checkpoint("t1", "a", 0, state(1)).await.unwrap(),
            None
        );
        assert!(matches!(
            manager.load_checkpoint("t1", "a-0").await,
            Err(CheckpointError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn test_disabled_skips_save_but_loads() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let enabled = CheckpointManager::new(store.clone());
        enabled.save_checkpoint("t1", "a", 0, state(1)).await.unwrap();

        let disabled = CheckpointManager::new(store.clone()).with_enabled(false);
        assert_eq!(
            disabled.save_checkpoint("t1", "b", 1, state(2)).await.unwrap(),
            None
        );
        assert_eq!(store.checkpoint_count().await, 1);
        assert!(disabled.load_checkpoint("t1", "a-0").await.is_ok());
    }

    #[tokio::test]
    async fn test_latest_checkpoint() {
        let manager = CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new()));
        assert!(manager.latest_checkpoint("t1").await.unwrap().is_none());

        manager.save_checkpoint("t1", "a", 0, state(1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        manager.save_checkpoint("t1", "b", 1, state(2)).await.unwrap();

        let latest = manager.latest_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(latest.id, "b-1");
    }
}
