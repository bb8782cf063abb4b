//! Configuration types for the sync engine
//!
//! This module defines the orchestrator and store configuration
//! structures. Feed adapter credentials live with the adapter crate;
//! the core only carries the knobs it consumes itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Sync orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of cities fetched and reconciled concurrently
    ///
    /// The shared credential and the upstream rate-limit budget are the
    /// only state shared across city tasks; this bound protects both.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Overall run deadline in seconds; 0 disables the deadline
    ///
    /// On expiry, in-flight city tasks are cancelled cooperatively and
    /// unfinished cities are recorded as failed with a timeout.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Whether content-identical records still advance `updated_at`
    ///
    /// When true (the default), every successful fetch touch refreshes
    /// `updated_at` so staleness can be read as `now - updated_at`
    /// regardless of content churn.
    #[serde(default = "default_touch_unchanged")]
    pub touch_unchanged: bool,

    /// Retry policy handed to the feed adapter
    #[serde(default)]
    pub retry: RetryConfig,

    /// Capacity of the sync event channel
    ///
    /// When full, new events are dropped with a warning rather than
    /// blocking the orchestrator.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_concurrency == 0 {
            return Err(crate::Error::config("max_concurrency must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        self.retry.validate()?;
        Ok(())
    }

    /// The run deadline, if one is configured
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            run_timeout_secs: default_run_timeout_secs(),
            touch_unchanged: default_touch_unchanged(),
            retry: RetryConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Serializable retry settings, converted to a [`RetryPolicy`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction in `0.0..=1.0`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl RetryConfig {
    /// Validate the retry settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 {
            return Err(crate::Error::config("retry max_attempts must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(crate::Error::config("retry jitter must be in 0.0..=1.0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(crate::Error::config(
                "retry max_delay_ms must be >= base_delay_ms",
            ));
        }
        Ok(())
    }

    /// Build the policy value consumed by feed adapters
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Store backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// File-backed store with atomic writes
    File {
        /// Path to the store file
        path: String,
    },
}

fn default_max_concurrency() -> usize {
    4
}

fn default_run_timeout_secs() -> u64 {
    0
}

fn default_touch_unchanged() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SyncConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = SyncConfig {
            max_concurrency: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_config_builds_policy() {
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: 0.0,
        };
        retry.validate().unwrap();
        let policy = retry.policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn inverted_delay_bounds_rejected() {
        let retry = RetryConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 100,
            ..RetryConfig::default()
        };
        assert!(retry.validate().is_err());
    }
}
