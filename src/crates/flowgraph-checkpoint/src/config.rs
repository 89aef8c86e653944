//! Backend selection from configuration
//!
//! A [`StoreConfig`] names one backend and its settings. [`connect`] turns it
//! into a shared `dyn CheckpointStore`; there is no global registry, callers
//! pass the resulting store to whatever needs it.
//!
//! ```yaml
//! checkpoint:
//!   backend: sqlite
//!   url: sqlite:checkpoints.db
//!   max_connections: 5
//! ```

use crate::{
    error::{CheckpointError, Result},
    file::FileCheckpointStore,
    kv::{InMemoryKeyValue, KeyValueCheckpointStore, DEFAULT_TTL},
    memory::InMemoryCheckpointStore,
    sqlite::SqliteCheckpointStore,
    traits::CheckpointStore,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn default_max_connections() -> u32 {
    5
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

/// Checkpoint backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-lifetime in-memory store
    Memory,

    /// One JSON document per checkpoint under `directory`
    File {
        /// Root directory
        directory: PathBuf,
    },

    /// SQLite database
    Sqlite {
        /// Connection string, e.g. `sqlite:checkpoints.db`
        url: String,
        /// Pool size (ignored for `sqlite::memory:`)
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },

    /// Key-value store with expiry
    ///
    /// Without a `url` an in-process key space is used; with one, a Redis
    /// server (requires the `redis` feature).
    KeyValue {
        /// Expiry for payloads and thread indexes
        #[serde(default = "default_ttl_secs")]
        ttl_secs: u64,
        /// Redis URL
        #[serde(default)]
        url: Option<String>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

impl StoreConfig {
    /// Backend name as it appears in configuration
    pub fn backend_name(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::File { .. } => "file",
            StoreConfig::Sqlite { .. } => "sqlite",
            StoreConfig::KeyValue { .. } => "key_value",
        }
    }
}

/// Build the configured checkpoint store
#[tracing::instrument(skip(config), fields(backend = config.backend_name()))]
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CheckpointStore>> {
    let store: Arc<dyn CheckpointStore> = match config {
        StoreConfig::Memory => Arc::new(InMemoryCheckpointStore::new()),
        StoreConfig::File { directory } => Arc::new(FileCheckpointStore::new(directory).await?),
        StoreConfig::Sqlite {
            url,
            max_connections,
        } => Arc::new(SqliteCheckpointStore::connect(url, *max_connections).await?),
        StoreConfig::KeyValue { ttl_secs, url } => {
            let ttl = Duration::from_secs(*ttl_secs);
            match url {
                None => Arc::new(KeyValueCheckpointStore::new(InMemoryKeyValue::new()).with_ttl(ttl)),
                Some(url) => connect_redis(url, ttl).await?,
            }
        }
    };

    tracing::info!(backend = store.backend(), "Checkpoint store ready");
    Ok(store)
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str, ttl: Duration) -> Result<Arc<dyn CheckpointStore>> {
    let client = crate::kv::RedisKeyValue::connect(url).await?;
    Ok(Arc::new(KeyValueCheckpointStore::new(client).with_ttl(ttl)))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(url: &str, _ttl: Duration) -> Result<Arc<dyn CheckpointStore>> {
    Err(CheckpointError::Invalid(format!(
        "key-value url '{url}' requires the `redis` feature"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_backends() {
        let config: StoreConfig = serde_json::from_str(r#"{"backend":"memory"}"#).unwrap();
        assert_eq!(config, StoreConfig::Memory);

        let config: StoreConfig =
            serde_json::from_str(r#"{"backend":"sqlite","url":"sqlite::memory:"}"#).unwrap();
        assert_eq!(
            config,
            StoreConfig::Sqlite {
                url: "sqlite::memory:".to_string(),
                max_connections: 5
            }
        );

        let config: StoreConfig = serde_json::from_str(r#"{"backend":"key_value"}"#).unwrap();
        assert_eq!(
            config,
            StoreConfig::KeyValue {
                ttl_secs: DEFAULT_TTL.as_secs(),
                url: None
            }
        );
    }

    #[tokio::test]
    async fn test_connect_each_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let configs = [
            StoreConfig::Memory,
            StoreConfig::File {
                directory: dir.path().to_path_buf(),
            },
            StoreConfig::Sqlite {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            StoreConfig::KeyValue {
                ttl_secs: 60,
                url: None,
            },
        ];

        for config in &configs {
            let store = connect(config).await.unwrap();
            assert_eq!(store.backend(), config.backend_name());
        }
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_url_without_feature() {
        let config = StoreConfig::KeyValue {
            ttl_secs: 60,
            url: Some("redis://127.0.0.1:6379".to_string()),
        };
        assert!(matches!(
            connect(&config).await,
            Err(CheckpointError::Invalid(_))
        ));
    }
}
