//! Core checkpoint data structures
//!
//! A [`Checkpoint`] is a durable, point-in-time record of one thread's state,
//! tied to the node that produced it and the step index it ran at. The
//! serialized form is the document stored by the file and relational
//! backends:
//!
//! ```text
//! {
//!   "id": "classify-3",
//!   "thread_id": "conversation-42",
//!   "state": { "data": {...}, "metadata": {...} },
//!   "metadata": {...},
//!   "created_at": "2024-01-15T10:30:00.123456789Z",
//!   "node_id": "classify",
//!   "step_id": 3
//! }
//! ```
//!
//! [`CheckpointMetadata`] is the same record without the state payload and is
//! what listing operations return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Checkpoint identifier (unique per thread)
pub type CheckpointId = String;

/// State payload stored inside a checkpoint
///
/// Mirrors the data and metadata maps of the engine's state container. The
/// snapshot history of a live state is not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    /// Working key/value data
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// State-level metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StateData {
    /// Create a payload from data and metadata maps
    pub fn new(
        data: HashMap<String, serde_json::Value>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self { data, metadata }
    }
}

/// Durable record of a thread's state at a given node and step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id, unique within its thread
    pub id: CheckpointId,

    /// Execution thread this checkpoint belongs to
    pub thread_id: String,

    /// Full state payload
    pub state: StateData,

    /// Free-form checkpoint metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Node that completed right before this checkpoint was taken
    pub node_id: String,

    /// Step index within the execution
    #[serde(rename = "step_id")]
    pub step_index: i64,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current time
    pub fn new(
        thread_id: impl Into<String>,
        id: impl Into<CheckpointId>,
        node_id: impl Into<String>,
        step_index: i64,
        state: StateData,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            state,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            node_id: node_id.into(),
            step_index,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Listing view of this checkpoint (everything but the state payload)
    pub fn to_metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata {
            id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            node_id: self.node_id.clone(),
            step_index: self.step_index,
        }
    }
}

/// Checkpoint without its state payload, used for cheap listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Checkpoint id
    pub id: CheckpointId,
    /// Owning thread
    pub thread_id: String,
    /// Free-form checkpoint metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Node that produced the checkpoint
    pub node_id: String,
    /// Step index
    #[serde(rename = "step_id")]
    pub step_index: i64,
}

impl From<&Checkpoint> for CheckpointMetadata {
    fn from(checkpoint: &Checkpoint) -> Self {
        checkpoint.to_metadata()
    }
}

/// Ordering used by every backend when listing: newest first.
///
/// Ties on `created_at` fall back to the higher step index, then the higher id.
pub fn newest_first(a: &CheckpointMetadata, b: &CheckpointMetadata) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.step_index.cmp(&a.step_index))
        .then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample() -> Checkpoint {
        let mut data = HashMap::new();
        data.insert("x".to_string(), json!(1));
        Checkpoint::new("t1", "a-0", "a", 0, StateData::new(data, HashMap::new()))
            .with_metadata("source", json!("loop"))
    }

    #[test]
    fn test_document_field_names() {
        let doc = serde_json::to_value(sample()).unwrap();
        let obj = doc.as_object().unwrap();
        for field in ["id", "thread_id", "state", "metadata", "created_at", "node_id", "step_id"] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
        assert_eq!(doc["state"]["data"]["x"], json!(1));
        assert!(doc["state"]["metadata"].is_object());
    }

    #[test]
    fn test_document_round_trip() {
        let checkpoint = sample();
        let text = serde_json::to_string(&checkpoint).unwrap();
        let parsed: Checkpoint = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, checkpoint);
    }

    #[test]
    fn test_to_metadata_drops_state() {
        let checkpoint = sample();
        let meta = checkpoint.to_metadata();
        assert_eq!(meta.id, "a-0");
        assert_eq!(meta.node_id, "a");
        assert_eq!(meta.metadata.get("source"), Some(&json!("loop")));
    }

    #[test]
    fn test_newest_first_ordering() {
        let now = Utc::now();
        let older = sample().with_created_at(now - Duration::seconds(5)).to_metadata();
        let newer = sample().with_created_at(now).to_metadata();

        let mut items = vec![older.clone(), newer.clone()];
        items.sort_by(newest_first);
        assert_eq!(items, vec![newer, older]);
    }
}
