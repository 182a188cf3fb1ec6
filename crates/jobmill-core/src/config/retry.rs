//! Job retry configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;
use crate::types::BackoffPolicy;

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Constant `base_seconds`.
    Fixed,
    /// Doubling from `base_seconds` up to `max_seconds`.
    Exponential,
    /// Explicit `schedule_seconds` list.
    Schedule,
}

/// Retry policy applied to transient handler failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after which a failing job is marked permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff curve.
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,
    /// Base delay in seconds.
    #[serde(default = "default_base")]
    pub base_seconds: u64,
    /// Delay ceiling in seconds (exponential only).
    #[serde(default = "default_max")]
    pub max_seconds: u64,
    /// Per-attempt delays in seconds (schedule only).
    #[serde(default)]
    pub schedule_seconds: Vec<u64>,
}

impl RetryConfig {
    /// Build the [`BackoffPolicy`] described by this section.
    pub fn backoff(&self) -> AppResult<BackoffPolicy> {
        let base = seconds(self.base_seconds);
        match self.strategy {
            BackoffStrategy::Fixed => Ok(BackoffPolicy::Fixed(base)),
            BackoffStrategy::Exponential => Ok(BackoffPolicy::Exponential {
                base,
                max: seconds(self.max_seconds).max(base),
            }),
            BackoffStrategy::Schedule => BackoffPolicy::schedule(
                self.schedule_seconds.iter().copied().map(seconds).collect(),
            ),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: default_strategy(),
            base_seconds: default_base(),
            max_seconds: default_max(),
            schedule_seconds: Vec::new(),
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

fn default_max_attempts() -> u32 {
    5
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_base() -> u64 {
    30
}

fn default_max() -> u64 {
    6 * 3600
}
