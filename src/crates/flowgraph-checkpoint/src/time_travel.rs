//! Read-only time-travel queries over a [`CheckpointManager`]

use crate::{
    checkpoint::{Checkpoint, CheckpointMetadata, StateData},
    error::{CheckpointError, Result},
    manager::CheckpointManager,
};

/// Rewind and search a thread's checkpoint history
#[derive(Debug, Clone)]
pub struct TimeTravel {
    manager: CheckpointManager,
}

impl TimeTravel {
    /// Query layer over `manager`
    pub fn new(manager: CheckpointManager) -> Self {
        Self { manager }
    }

    /// State payload stored in a checkpoint
    pub async fn rewind_to(&self, thread_id: &str, checkpoint_id: &str) -> Result<StateData> {
        let checkpoint = self.manager.load_checkpoint(thread_id, checkpoint_id).await?;
        tracing::debug!(thread_id, checkpoint_id, "Rewound to checkpoint");
        Ok(checkpoint.state)
    }

    /// Thread history, newest first
    pub async fn get_history(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        self.manager.list_checkpoints(thread_id).await
    }

    /// Checkpoint taken at exactly `step_index`
    pub async fn find_checkpoint_by_step(&self, thread_id: &str, step_index: i64) -> Result<Checkpoint> {
        let found = self
            .get_history(thread_id)
            .await?
            .into_iter()
            .find(|meta| meta.step_index == step_index)
            .ok_or_else(|| CheckpointError::not_found(thread_id, format!("step {step_index}")))?;

        self.manager.load_checkpoint(thread_id, &found.id).await
    }

    /// Most recent checkpoint produced by `node_id`
    pub async fn find_checkpoint_by_node(&self, thread_id: &str, node_id: &str) -> Result<Checkpoint> {
        // History is newest first, so the first match is the most recent.
        let found = self
            .get_history(thread_id)
            .await?
            .into_iter()
            .find(|meta| meta.node_id == node_id)
            .ok_or_else(|| CheckpointError::not_found(thread_id, format!("node {node_id}")))?;

        self.manager.load_checkpoint(thread_id, &found.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCheckpointStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn seeded() -> TimeTravel {
        let manager = CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new()));
        for (step, node) in ["plan", "act", "plan", "act"].iter().enumerate() {
            let mut data = HashMap::new();
            data.insert("step".to_string(), json!(step));
            manager
                .save_checkpoint("t1", node, step as i64, StateData::new(data, HashMap::new()))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        TimeTravel::new(manager)
    }

    #[tokio::test]
    async fn test_rewind_returns_state_only() {
        let tt = seeded().await;
        let state = tt.rewind_to("t1", "act-1").await.unwrap();
        assert_eq!(state.data["step"], json!(1));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let tt = seeded().await;
        let ids: Vec<_> = tt
            .get_history("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["act-3", "plan-2", "act-1", "plan-0"]);
    }

    #[tokio::test]
    async fn test_find_by_step() {
        let tt = seeded().await;
        assert_eq!(tt.find_checkpoint_by_step("t1", 2).await.unwrap().id, "plan-2");
        assert!(tt
            .find_checkpoint_by_step("t1", 9)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_find_by_node_picks_most_recent() {
        let tt = seeded().await;
        assert_eq!(tt.find_checkpoint_by_node("t1", "plan").await.unwrap().id, "plan-2");
        assert!(tt
            .find_checkpoint_by_node("t1", "review")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
