//! Key-value checkpoint store with expiry
//!
//! Checkpoints are stored as JSON payloads under per-checkpoint keys, and a
//! per-thread sorted index (scored by creation time) gives ordered listing.
//! Both keys carry the same TTL, refreshed on every save:
//!
//! ```text
//! checkpoint:{thread_id}:{checkpoint_id}  -> JSON document      (TTL)
//! thread:{thread_id}:checkpoints          -> sorted set of ids  (TTL)
//!                                            score = created_at µs
//! ```
//!
//! The store is generic over a [`KeyValueClient`]. [`InMemoryKeyValue`] is an
//! in-process implementation; with the `redis` feature, `RedisKeyValue` talks
//! to a Redis server.
//!
//! Index entries whose payload has already expired are pruned while listing.

use crate::{
    checkpoint::{newest_first, Checkpoint, CheckpointMetadata},
    error::{CheckpointError, Result},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Default expiry for checkpoint keys (7 days)
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Minimal key-value operations the checkpoint store needs
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    /// Set a string value with an expiry
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Get a string value, `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add or update a member of a sorted set
    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Remove a member from a sorted set, returning whether it was present
    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of a sorted set, highest score first
    async fn sorted_members_rev(&self, key: &str) -> Result<Vec<String>>;

    /// Reset the expiry of a key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Release the connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn payload_key(thread_id: &str, checkpoint_id: &str) -> String {
    format!("checkpoint:{thread_id}:{checkpoint_id}")
}

fn index_key(thread_id: &str) -> String {
    format!("thread:{thread_id}:checkpoints")
}

/// Checkpoint store over any [`KeyValueClient`]
#[derive(Debug, Clone)]
pub struct KeyValueCheckpointStore<C> {
    client: C,
    ttl: Duration,
}

impl<C: KeyValueClient> KeyValueCheckpointStore<C> {
    /// Create a store using [`DEFAULT_TTL`]
    pub fn new(client: C) -> Self {
        Self {
            client,
            ttl: DEFAULT_TTL,
        }
    }

    /// Set the expiry applied to payloads and thread indexes
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Configured expiry
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Underlying client
    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: KeyValueClient> CheckpointStore for KeyValueCheckpointStore<C> {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let payload = serde_json::to_string(checkpoint)?;
        let index = index_key(&checkpoint.thread_id);
        let score = checkpoint.created_at.timestamp_micros() as f64;

        self.client
            .set_with_ttl(
                &payload_key(&checkpoint.thread_id, &checkpoint.id),
                payload,
                self.ttl,
            )
            .await?;
        self.client.sorted_add(&index, &checkpoint.id, score).await?;
        self.client.expire(&index, self.ttl).await?;

        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.id,
            ttl_secs = self.ttl.as_secs(),
            "Saved checkpoint to key-value store"
        );
        Ok(())
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        let payload = self
            .client
            .get(&payload_key(thread_id, checkpoint_id))
            .await?
            .ok_or_else(|| CheckpointError::not_found(thread_id, checkpoint_id))?;

        Ok(serde_json::from_str(&payload)?)
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        let index = index_key(thread_id);
        let ids = self.client.sorted_members_rev(&index).await?;

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            match self.client.get(&payload_key(thread_id, &id)).await? {
                Some(payload) => {
                    let checkpoint: Checkpoint = serde_json::from_str(&payload)?;
                    results.push(checkpoint.to_metadata());
                }
                None => {
                    tracing::warn!(
                        thread_id,
                        checkpoint_id = %id,
                        "Index references an expired checkpoint, pruning"
                    );
                    self.client.sorted_remove(&index, &id).await?;
                }
            }
        }

        results.sort_by(newest_first);
        Ok(results)
    }

    async fn delete(&self, thread_id: &str, checkpoint_id: &str) -> Result<()> {
        let existed = self
            .client
            .delete(&payload_key(thread_id, checkpoint_id))
            .await?;
        self.client
            .sorted_remove(&index_key(thread_id), checkpoint_id)
            .await?;

        if !existed {
            return Err(CheckpointError::not_found(thread_id, checkpoint_id));
        }
        tracing::debug!(thread_id, checkpoint_id, "Deleted checkpoint from key-value store");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.close().await
    }

    fn backend(&self) -> &'static str {
        "key_value"
    }
}

#[derive(Debug)]
enum Entry {
    Text(String),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process [`KeyValueClient`] with lazy expiry
///
/// Expiry uses `tokio::time::Instant`, so tests can drive it with a paused
/// clock.
#[derive(Debug, Default)]
pub struct InMemoryKeyValue {
    slots: Mutex<HashMap<String, Slot>>,
}

impl InMemoryKeyValue {
    /// Create an empty key space
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.lock().values().filter(|s| s.is_live(now)).count()
    }

    /// Whether there are no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_live<R>(&self, key: &str, f: impl FnOnce(Option<&mut Slot>) -> R) -> R {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
            slots.remove(key);
        }
        f(slots.get_mut(key))
    }
}

#[async_trait]
impl KeyValueClient for InMemoryKeyValue {
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.slots.lock().insert(
            key.to_string(),
            Slot {
                entry: Entry::Text(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_live(key, |slot| match slot.as_deref().map(|s| &s.entry) {
            Some(Entry::Text(value)) => Ok(Some(value.clone())),
            Some(Entry::Sorted(_)) => Err(CheckpointError::storage(format!(
                "key '{key}' holds a sorted set"
            ))),
            None => Ok(None),
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.with_live(key, |slot| slot.is_some());
        self.slots.lock().remove(key);
        Ok(existed)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
            slots.remove(key);
        }
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            entry: Entry::Sorted(HashMap::new()),
            expires_at: None,
        });
        match &mut slot.entry {
            Entry::Sorted(members) => {
                members.insert(member.to_string(), score);
                Ok(())
            }
            Entry::Text(_) => Err(CheckpointError::storage(format!(
                "key '{key}' holds a string"
            ))),
        }
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
        self.with_live(key, |slot| match slot.map(|s| &mut s.entry) {
            Some(Entry::Sorted(members)) => Ok(members.remove(member).is_some()),
            Some(Entry::Text(_)) => Err(CheckpointError::storage(format!(
                "key '{key}' holds a string"
            ))),
            None => Ok(false),
        })
    }

    async fn sorted_members_rev(&self, key: &str) -> Result<Vec<String>> {
        self.with_live(key, |slot| match slot.as_deref().map(|s| &s.entry) {
            Some(Entry::Sorted(members)) => {
                let mut ranked: Vec<(&String, &f64)> = members.iter().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| b.0.cmp(a.0)));
                Ok(ranked.into_iter().map(|(m, _)| m.clone()).collect())
            }
            Some(Entry::Text(_)) => Err(CheckpointError::storage(format!(
                "key '{key}' holds a string"
            ))),
            None => Ok(Vec::new()),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.with_live(key, |slot| {
            if let Some(slot) = slot {
                slot.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_client::RedisKeyValue;

#[cfg(feature = "redis")]
mod redis_client {
    use super::KeyValueClient;
    use crate::error::{CheckpointError, Result};
    use async_trait::async_trait;
    use redis::{aio::MultiplexedConnection, AsyncCommands};
    use std::time::Duration;

    /// [`KeyValueClient`] backed by a Redis server
    #[derive(Clone)]
    pub struct RedisKeyValue {
        conn: MultiplexedConnection,
    }

    impl std::fmt::Debug for RedisKeyValue {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisKeyValue").finish_non_exhaustive()
        }
    }

    impl RedisKeyValue {
        /// Connect to `url` (e.g. `redis://127.0.0.1:6379`)
        pub async fn connect(url: &str) -> Result<Self> {
            let client = redis::Client::open(url).map_err(CheckpointError::storage)?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(CheckpointError::storage)?;
            tracing::debug!(url, "Connected to Redis");
            Ok(Self { conn })
        }
    }

    fn seconds(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }

    #[async_trait]
    impl KeyValueClient for RedisKeyValue {
        async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
            let mut conn = self.conn.clone();
            let _: () = conn
                .set_ex(key, value, seconds(ttl))
                .await
                .map_err(CheckpointError::storage)?;
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            let mut conn = self.conn.clone();
            conn.get(key).await.map_err(CheckpointError::storage)
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            let mut conn = self.conn.clone();
            let removed: i64 = conn.del(key).await.map_err(CheckpointError::storage)?;
            Ok(removed > 0)
        }

        async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
            let mut conn = self.conn.clone();
            let _: i64 = conn
                .zadd(key, member, score)
                .await
                .map_err(CheckpointError::storage)?;
            Ok(())
        }

        async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
            let mut conn = self.conn.clone();
            let removed: i64 = conn
                .zrem(key, member)
                .await
                .map_err(CheckpointError::storage)?;
            Ok(removed > 0)
        }

        async fn sorted_members_rev(&self, key: &str) -> Result<Vec<String>> {
            let mut conn = self.conn.clone();
            conn.zrevrange(key, 0, -1)
                .await
                .map_err(CheckpointError::storage)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
            let mut conn = self.conn.clone();
            let _: bool = conn
                .expire(key, seconds(ttl) as i64)
                .await
                .map_err(CheckpointError::storage)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StateData;
    use chrono::Utc;

    fn store(ttl: Duration) -> KeyValueCheckpointStore<InMemoryKeyValue> {
        KeyValueCheckpointStore::new(InMemoryKeyValue::new()).with_ttl(ttl)
    }

    #[tokio::test]
    async fn test_key_layout() {
        let store = store(DEFAULT_TTL);
        let cp = Checkpoint::new("t1", "a-0", "a", 0, StateData::default());
        store.save(&cp).await.unwrap();

        let client = store.client();
        assert!(client.get("checkpoint:t1:a-0").await.unwrap().is_some());
        assert_eq!(
            client.sorted_members_rev("thread:t1:checkpoints").await.unwrap(),
            vec!["a-0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_index_ordered_by_creation_time() {
        let store = store(DEFAULT_TTL);
        let now = Utc::now();
        for (i, id) in ["s1", "s2", "s3"].iter().enumerate() {
            let cp = Checkpoint::new("t1", *id, "n", i as i64, StateData::default())
                .with_created_at(now + chrono::Duration::milliseconds(i as i64));
            store.save(&cp).await.unwrap();
        }

        let ids: Vec<_> = store
            .list("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["s3", "s2", "s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_expires() {
        let store = store(Duration::from_secs(60));
        let cp = Checkpoint::new("t1", "a-0", "a", 0, StateData::default());
        store.save(&cp).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(store.load("t1", "a-0").await.unwrap_err().is_not_found());
        assert!(store.list("t1").await.unwrap().is_empty());
        assert!(store.client().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_prunes_expired_payloads() {
        let store = store(Duration::from_secs(60));
        store
            .save(&Checkpoint::new("t1", "old", "a", 0, StateData::default()))
            .await
            .unwrap();

        // Simulate a payload evicted ahead of its index entry.
        store.client().delete("checkpoint:t1:old").await.unwrap();
        store
            .save(&Checkpoint::new("t1", "new", "a", 1, StateData::default()))
            .await
            .unwrap();

        let listed = store.list("t1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "new");
        assert_eq!(
            store
                .client()
                .sorted_members_rev("thread:t1:checkpoints")
                .await
                .unwrap(),
            vec!["new".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_refreshes_index_ttl() {
        let store = store(Duration::from_secs(60));
        store
            .save(&Checkpoint::new("t1", "a-0", "a", 0, StateData::default()))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        store
            .save(&Checkpoint::new("t1", "a-1", "a", 1, StateData::default()))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let listed = store.list("t1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a-1");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = store(DEFAULT_TTL);
        assert!(store.delete("t1", "x").await.unwrap_err().is_not_found());
    }
}
