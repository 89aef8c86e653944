//! Retry Policies - per-node retries for failed step functions
//!
//! A failing step function is retried up to [`RetryPolicy::max_retries`]
//! additional times. Attempts are separated by a delay that the executor
//! sleeps through cooperatively: cancellation or the execution deadline cut
//! the wait short.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(n) = delay_ms × backoff_factor^n        n = 0 for the first retry
//! delay(n) = min(delay(n), max_delay_ms)
//! if jitter: delay(n) *= random(0.5..=1.5)
//! ```
//!
//! The default `backoff_factor` of `1.0` gives a fixed delay between
//! attempts.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::retry::RetryPolicy;
//!
//! // 2 retries (3 attempts in total), 100ms apart, doubling each time
//! let policy = RetryPolicy::new(2)
//!     .with_delay_ms(100)
//!     .with_backoff_factor(2.0);
//!
//! assert_eq!(policy.total_attempts(), 3);
//! assert!(policy.should_retry(0));
//! assert!(!policy.should_retry(2));
//! ```
//!
//! Attempts do not roll back: a step function that mutated the state before
//! failing leaves that mutation visible to the next attempt.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

/// Configuration for retrying failed node executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Multiplier applied to the delay after each retry
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomize each delay by ±50%
    #[serde(default)]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries with default timing
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Set the delay before the first retry
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the backoff factor
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the maximum single delay
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempts including the first one
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow `retries_done` retries
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Delay before retry number `retry` (0-indexed)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor > 0.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let base = self.delay_ms as f64 * factor.powi(retry.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_delay_ms.max(self.delay_ms) as f64);

        let millis = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };

        Duration::from_micros((millis.max(0.0) * 1000.0).round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}
