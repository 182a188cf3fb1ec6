//! Background worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler loop configuration for one worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the worker is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of jobs this process executes concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Queues this worker claims from.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    /// Interval in milliseconds between polls when no job is due.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Age in seconds after which a claim is considered abandoned.
    ///
    /// Must exceed the longest expected handler run time, otherwise a slow
    /// job can be picked up a second time while still running.
    #[serde(default = "default_claim_staleness")]
    pub claim_staleness_seconds: u64,
    /// Ceiling in seconds for the poll backoff applied while the store is unreachable.
    #[serde(default = "default_error_backoff_max")]
    pub error_backoff_max_seconds: u64,
    /// How long shutdown waits for in-flight jobs, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl WorkerConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Claim staleness threshold as a [`chrono::Duration`].
    pub fn claim_staleness(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.claim_staleness_seconds).unwrap_or(i64::MAX);
        chrono::Duration::seconds(seconds.min(i64::MAX / 1000))
    }

    /// Upper bound for the store-error backoff.
    pub fn error_backoff_max(&self) -> Duration {
        Duration::from_secs(self.error_backoff_max_seconds)
    }

    /// Grace period for in-flight jobs on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            concurrency: default_concurrency(),
            queues: default_queues(),
            poll_interval_ms: default_poll_interval(),
            claim_staleness_seconds: default_claim_staleness(),
            error_backoff_max_seconds: default_error_backoff_max(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_queues() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_claim_staleness() -> u64 {
    3600
}

fn default_error_backoff_max() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    30
}
