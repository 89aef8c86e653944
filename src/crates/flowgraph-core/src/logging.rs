//! Logging initialisation
//!
//! The engine logs through `tracing` everywhere. Applications that do not
//! install their own subscriber can call [`init_logging`] once at startup:
//!
//! ```rust,no_run
//! use flowgraph_core::logging::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("logging already initialised");
//! ```
//!
//! `RUST_LOG`, when set, overrides the configured level.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn default_level() -> String {
    "info".to_string()
}

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`,
    /// `flowgraph_core=debug,sqlx=warn`)
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit one JSON object per event instead of human-readable lines
    #[serde(default)]
    pub json: bool,

    /// Include the event target (module path)
    #[serde(default = "default_true")]
    pub with_target: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Filter built from `RUST_LOG`, falling back to [`LoggingConfig::level`]
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| GraphError::Config(format!("invalid log level '{}': {e}", self.level))),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Fails with [`GraphError::Config`] when the level is not a valid filter or
/// a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| GraphError::Config(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_config_error() {
        let config = LoggingConfig {
            level: "flowgraph=loud".to_string(),
            ..LoggingConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(config.env_filter(), Err(GraphError::Config(_))));
        }
    }

    #[test]
    fn test_second_init_returns_error() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: LoggingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LoggingConfig::default());
    }
}
