//! State container for one execution thread
//!
//! A [`State`] holds the working data of a thread as a key/value map, a
//! separate metadata map, and a bounded history of immutable
//! [`StateSnapshot`]s. Everything sits behind a single read/write lock:
//! mutations take the exclusive lock, copy-producing reads take the shared
//! lock.
//!
//! # Copy Semantics
//!
//! Values are [`serde_json::Value`]s, which own all of their contents.
//! Every boundary crossing (`get`, `get_all`, `clone`, `create_snapshot`,
//! `restore_from_snapshot`) hands out a structural copy, so no two callers
//! ever alias the same value.
//!
//! ```text
//! State ──clone()──► State'        independent data, metadata and history
//!   │
//!   ├─create_snapshot()──► history [s1, s2, ..., sN]   oldest evicted first
//!   │
//!   └─restore_from_snapshot(s2)    data and metadata replaced wholesale
//! ```
//!
//! # Serialization
//!
//! `serialize`/`deserialize` go through JSON. JSON has a single number type,
//! so a round trip keeps integers that fit in `i64`/`u64` as integers and
//! turns every other number into an `f64`. Byte sequences are stored as
//! arrays of numbers. The snapshot history is not serialized.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::State;
//! use serde_json::json;
//!
//! let state = State::new();
//! state.set("count", json!(1));
//!
//! let snapshot = state.create_snapshot();
//! state.set("count", json!(2));
//! state.restore_from_snapshot(&snapshot);
//!
//! assert_eq!(state.get("count"), Some(json!(1)));
//! ```

use crate::error::StateError;
use chrono::{DateTime, Utc};
use flowgraph_checkpoint::StateData;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Any value storable in state
pub type StateValue = serde_json::Value;

/// Default number of snapshots kept in a state's history
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Immutable point-in-time copy of a state's data and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    id: String,
    timestamp: DateTime<Utc>,
    data: HashMap<String, StateValue>,
    metadata: HashMap<String, StateValue>,
}

impl StateSnapshot {
    /// Unique snapshot id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the snapshot was taken
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Data at snapshot time
    pub fn data(&self) -> &HashMap<String, StateValue> {
        &self.data
    }

    /// Metadata at snapshot time
    pub fn metadata(&self) -> &HashMap<String, StateValue> {
        &self.metadata
    }
}

#[derive(Debug)]
struct StateInner {
    data: HashMap<String, StateValue>,
    metadata: HashMap<String, StateValue>,
    history: VecDeque<StateSnapshot>,
    capacity: usize,
}

impl StateInner {
    fn empty(capacity: usize) -> Self {
        Self {
            data: HashMap::new(),
            metadata: HashMap::new(),
            history: VecDeque::new(),
            capacity,
        }
    }
}

/// Thread-safe key/value state with snapshot history
///
/// `State` is cheap to pass around by value, but [`Clone`] is a deep copy:
/// the clone never observes later mutations of the original and vice versa.
pub struct State {
    inner: Arc<RwLock<StateInner>>,
}

impl State {
    /// Empty state with the default history capacity
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Empty state keeping at most `capacity` snapshots
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateInner::empty(capacity))),
        }
    }

    /// State initialised from a data map
    pub fn from_data(data: HashMap<String, StateValue>) -> Self {
        let state = Self::new();
        state.inner.write().data = data;
        state
    }

    /// Second handle onto the same underlying state.
    ///
    /// Mutations through either handle are visible to both. Used by the
    /// executor so partial mutations of a failed attempt survive.
    pub(crate) fn handle(&self) -> State {
        State {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn into_history_capacity(self, capacity: usize) -> State {
        {
            let mut inner = self.inner.write();
            inner.capacity = capacity;
            while inner.history.len() > capacity {
                inner.history.pop_front();
            }
        }
        self
    }

    /// Copy of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<StateValue> {
        self.inner.read().data.get(key).cloned()
    }

    /// Typed read of `key`; `Ok(None)` when missing
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn set(&self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.inner.write().data.insert(key.into(), value.into());
    }

    /// Remove `key`, returning its value
    pub fn delete(&self, key: &str) -> Option<StateValue> {
        self.inner.write().data.remove(key)
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().data.contains_key(key)
    }

    /// Sorted list of data keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().data.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of data entries
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// Whether there are no data entries
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Deep copy of all data
    pub fn get_all(&self) -> HashMap<String, StateValue> {
        self.inner.read().data.clone()
    }

    /// Store a metadata entry
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.inner.write().metadata.insert(key.into(), value.into());
    }

    /// Copy of a metadata entry
    pub fn get_metadata(&self, key: &str) -> Option<StateValue> {
        self.inner.read().metadata.get(key).cloned()
    }

    /// Deep copy of all metadata
    pub fn metadata(&self) -> HashMap<String, StateValue> {
        self.inner.read().metadata.clone()
    }

    /// Copy `other`'s data and metadata into this state.
    ///
    /// Keys from `other` win on conflict. Merging is last-write-wins per key
    /// and not commutative.
    pub fn merge(&self, other: &State) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let (data, metadata) = {
            let other = other.inner.read();
            (other.data.clone(), other.metadata.clone())
        };

        let mut inner = self.inner.write();
        inner.data.extend(data);
        inner.metadata.extend(metadata);
    }

    /// Record a snapshot in the history and return it.
    ///
    /// When the history is full the oldest snapshot is evicted. With a
    /// capacity of zero nothing is kept, but the snapshot is still returned.
    pub fn create_snapshot(&self) -> StateSnapshot {
        let mut inner = self.inner.write();
        let snapshot = StateSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            data: inner.data.clone(),
            metadata: inner.metadata.clone(),
        };

        if inner.capacity > 0 {
            while inner.history.len() >= inner.capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(snapshot.clone());
        }
        snapshot
    }

    /// Replace data and metadata with the snapshot's; history is untouched
    pub fn restore_from_snapshot(&self, snapshot: &StateSnapshot) {
        let mut inner = self.inner.write();
        inner.data = snapshot.data.clone();
        inner.metadata = snapshot.metadata.clone();
    }

    /// Restore a snapshot still held in this state's history
    pub fn restore_snapshot(&self, snapshot_id: &str) -> Result<(), StateError> {
        let snapshot = self
            .inner
            .read()
            .history
            .iter()
            .find(|s| s.id == snapshot_id)
            .cloned()
            .ok_or_else(|| {
                StateError::InvalidSnapshot(format!("snapshot '{snapshot_id}' is not in history"))
            })?;
        self.restore_from_snapshot(&snapshot);
        Ok(())
    }

    /// Copy of the snapshot history, oldest first
    pub fn history(&self) -> Vec<StateSnapshot> {
        self.inner.read().history.iter().cloned().collect()
    }

    /// Maximum number of snapshots kept
    pub fn history_capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// Drop all snapshots
    pub fn clear_history(&self) {
        self.inner.write().history.clear();
    }

    /// Checkpoint payload for this state
    pub fn to_state_data(&self) -> StateData {
        let inner = self.inner.read();
        StateData::new(inner.data.clone(), inner.metadata.clone())
    }

    /// State rebuilt from a checkpoint payload
    pub fn from_state_data(payload: StateData) -> Self {
        let state = Self::new();
        {
            let mut inner = state.inner.write();
            inner.data = payload.data;
            inner.metadata = payload.metadata;
        }
        state
    }

    /// Portable JSON encoding of data and metadata
    pub fn serialize(&self) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(&self.to_state_data())?)
    }

    /// Decode bytes produced by [`State::serialize`]
    pub fn deserialize(bytes: &[u8]) -> Result<Self, StateError> {
        let payload: StateData = serde_json::from_slice(bytes)?;
        Ok(Self::from_state_data(payload))
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for State {
    fn clone(&self) -> Self {
        let inner = self.inner.read();
        Self {
            inner: Arc::new(RwLock::new(StateInner {
                data: inner.data.clone(),
                metadata: inner.metadata.clone(),
                history: inner.history.clone(),
                capacity: inner.capacity,
            })),
        }
    }
}

impl PartialEq for State {
    /// Compares data and metadata; history is ignored
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let (data, metadata) = {
            let other = other.inner.read();
            (other.data.clone(), other.metadata.clone())
        };
        let inner = self.inner.read();
        inner.data == data && inner.metadata == metadata
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("State")
            .field("data", &inner.data)
            .field("metadata", &inner.metadata)
            .field("history_len", &inner.history.len())
            .finish()
    }
}

impl From<HashMap<String, StateValue>> for State {
    fn from(data: HashMap<String, StateValue>) -> Self {
        Self::from_data(data)
    }
}

impl From<StateData> for State {
    fn from(payload: StateData) -> Self {
        Self::from_state_data(payload)
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_state_data().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StateData::deserialize(deserializer).map(State::from_state_data)
    }
}
