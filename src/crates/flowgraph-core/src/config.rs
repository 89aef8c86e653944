//! Engine configuration
//!
//! [`GraphConfig`] controls one graph's execution loop. [`EngineConfig`]
//! bundles it with the checkpoint backend and logging settings and can be
//! loaded from YAML or TOML files:
//!
//! ```yaml
//! graph:
//!   max_iterations: 50
//!   timeout_ms: ${FLOWGRAPH_TIMEOUT_MS:60000}
//!   thread_id: support-bot
//!   retry:
//!     max_retries: 2
//!     delay_ms: 250
//! checkpoint:
//!   backend: sqlite
//!   url: ${FLOWGRAPH_DB:sqlite:checkpoints.db}
//! logging:
//!   level: info
//!   json: true
//! ```
//!
//! String values may reference environment variables as `${NAME}` or
//! `${NAME:default}`. A value that consists of a single placeholder is
//! re-typed after expansion, so `${TIMEOUT:5000}` can fill a numeric field.

use crate::error::{GraphError, Result};
use crate::logging::LoggingConfig;
use crate::retry::RetryPolicy;
use crate::state::DEFAULT_HISTORY_CAPACITY;
use flowgraph_checkpoint::{connect, CheckpointManager, StoreConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

fn default_max_iterations() -> usize {
    100
}

fn default_timeout_ms() -> Option<u64> {
    Some(300_000)
}

fn default_result_buffer() -> usize {
    100
}

fn default_thread_id() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

/// Settings for a graph's execution loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Upper bound on node executions per `execute` call
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Wall-clock deadline for a whole `execute` call; `None` disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: Option<u64>,

    /// Per-node retry policy
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Capacity of the execution result queue
    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,

    /// Concurrency limit for parallel super-steps; `None` is unbounded
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Thread id used for checkpoints
    #[serde(default = "default_thread_id")]
    pub thread_id: String,

    /// Save a checkpoint after every completed step (needs a store)
    #[serde(default = "default_true")]
    pub checkpointing: bool,

    /// Snapshot history capacity for states created by the engine
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            result_buffer: default_result_buffer(),
            max_concurrency: None,
            thread_id: default_thread_id(),
            checkpointing: true,
            history_capacity: default_history_capacity(),
        }
    }
}

impl GraphConfig {
    /// Set the iteration bound
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the execution deadline
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_ms = timeout.map(|t| t.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the result queue capacity
    pub fn with_result_buffer(mut self, result_buffer: usize) -> Self {
        self.result_buffer = result_buffer;
        self
    }

    /// Limit concurrency of parallel super-steps
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Set the checkpoint thread id
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// Enable or disable per-step checkpoints
    pub fn with_checkpointing(mut self, enabled: bool) -> Self {
        self.checkpointing = enabled;
        self
    }

    /// Execution deadline as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execution loop settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// Checkpoint backend; `None` runs without persistence
    #[serde(default)]
    pub checkpoint: Option<StoreConfig>,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load from a `.yaml`, `.yml` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GraphError::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(GraphError::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// Parse YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: JsonValue = serde_yaml::from_str(content)
            .map_err(|e| GraphError::Config(format!("invalid YAML: {e}")))?;
        Self::from_value(value)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value: JsonValue =
            toml::from_str(content).map_err(|e| GraphError::Config(format!("invalid TOML: {e}")))?;
        Self::from_value(value)
    }

    fn from_value(mut value: JsonValue) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        expand_variables(&mut value);
        let config: Self = serde_json::from_value(value)
            .map_err(|e| GraphError::Config(format!("invalid configuration: {e}")))?;

        tracing::debug!(
            backend = config.checkpoint.as_ref().map(|c| c.backend_name()),
            thread_id = %config.graph.thread_id,
            "Loaded engine configuration"
        );
        Ok(config)
    }

    /// Checkpoint manager for the configured backend.
    ///
    /// Without a backend the manager has no store: saves are skipped and
    /// loads fail.
    pub async fn checkpoint_manager(&self) -> Result<CheckpointManager> {
        let manager = match &self.checkpoint {
            Some(store) => CheckpointManager::new(connect(store).await?),
            None => CheckpointManager::without_store(),
        };
        Ok(manager.with_enabled(self.graph.checkpointing))
    }
}

fn expand_variables(value: &mut JsonValue) {
    match value {
        JsonValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *value = expanded;
            }
        }
        JsonValue::Array(items) => items.iter_mut().for_each(expand_variables),
        JsonValue::Object(map) => map.values_mut().for_each(expand_variables),
        _ => {}
    }
}

/// `${NAME}` or `${NAME:default}`, compiled once per process
fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok())
        .as_ref()
}

/// Expand `${NAME}` / `${NAME:default}` placeholders in a string.
///
/// Returns `None` when the string has no placeholder.
fn expand_env_in_string(s: &str) -> Option<JsonValue> {
    if !s.contains("${") {
        return None;
    }
    let re = placeholder()?;

    let whole = re
        .find(s)
        .map(|m| m.start() == 0 && m.end() == s.len())
        .unwrap_or(false);

    let expanded = re
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned();

    if whole && !expanded.is_empty() {
        if let Ok(typed @ (JsonValue::Number(_) | JsonValue::Bool(_))) =
            serde_yaml::from_str::<JsonValue>(&expanded)
        {
            return Some(typed);
        }
    }
    Some(JsonValue::String(expanded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_config_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.result_buffer, 100);
        assert_eq!(config.thread_id, "default");
        assert!(config.checkpointing);
        assert_eq!(config.max_concurrency, None);
    }

    #[test]
    fn test_yaml_with_env_expansion() {
        std::env::set_var("FLOWGRAPH_TEST_ITERATIONS", "7");
        let config = EngineConfig::from_yaml_str(
            r#"
graph:
  max_iterations: ${FLOWGRAPH_TEST_ITERATIONS:100}
  timeout_ms: ${FLOWGRAPH_TEST_MISSING_TIMEOUT:1500}
  thread_id: "run-${FLOWGRAPH_TEST_MISSING_SUFFIX:a}"
  retry:
    max_retries: 2
checkpoint:
  backend: sqlite
  url: ${FLOWGRAPH_TEST_MISSING_URL:sqlite::memory:}
"#,
        )
        .unwrap();

        assert_eq!(config.graph.max_iterations, 7);
        assert_eq!(config.graph.timeout_ms, Some(1500));
        assert_eq!(config.graph.thread_id, "run-a");
        assert_eq!(config.graph.retry.max_retries, 2);
        assert_eq!(
            config.checkpoint,
            Some(StoreConfig::Sqlite {
                url: "sqlite::memory:".to_string(),
                max_connections: 5
            })
        );
    }

    #[test]
    fn test_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
[graph]
max_iterations = 10
max_concurrency = 4

[checkpoint]
backend = "key_value"
ttl_secs = 30

[logging]
level = "debug"
json = true
"#,
        )
        .unwrap();

        assert_eq!(config.graph.max_iterations, 10);
        assert_eq!(config.graph.max_concurrency, Some(4));
        assert_eq!(
            config.checkpoint,
            Some(StoreConfig::KeyValue {
                ttl_secs: 30,
                url: None
            })
        );
        assert!(config.logging.json);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(EngineConfig::from_yaml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yml");
        std::fs::write(&path, "graph:\n  thread_id: from-file\n").unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap().graph.thread_id, "from-file");

        let path = dir.path().join("engine.ini");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(EngineConfig::from_file(&path), Err(GraphError::Config(_))));
    }

    #[test]
    fn test_placeholder_inside_text_stays_string() {
        assert_eq!(
            expand_env_in_string("${FLOWGRAPH_TEST_MISSING_N:5} items"),
            Some(json!("5 items"))
        );
        assert_eq!(expand_env_in_string("plain"), None);
    }

    #[test]
    fn test_placeholder_pattern_is_shared_across_calls() {
        let first = placeholder().unwrap();
        for port in 0..50 {
            let text =
                format!("${{FLOWGRAPH_TEST_MISSING_H:host}}:${{FLOWGRAPH_TEST_MISSING_P:{port}}}");
            let expected = json!(format!("host:{port}"));
            assert_eq!(expand_env_in_string(&text), Some(expected));
        }
        assert!(std::ptr::eq(first, placeholder().unwrap()));
    }

    #[tokio::test]
    async fn test_checkpoint_manager_without_backend() {
        let manager = EngineConfig::default().checkpoint_manager().await.unwrap();
        assert!(!manager.is_enabled());
    }

    #[tokio::test]
    async fn test_checkpoint_manager_respects_switch() {
        let mut config = EngineConfig::default();
        config.checkpoint = Some(StoreConfig::Memory);
        config.graph.checkpointing = false;
        let manager = config.checkpoint_manager().await.unwrap();
        assert!(!manager.is_enabled());
        assert!(manager.store().is_some());
    }
}
