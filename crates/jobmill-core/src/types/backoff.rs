//! Retry delay policy for failed jobs.

use chrono::Duration;

use crate::error::AppError;
use crate::result::AppResult;

/// Largest exponent applied by [`BackoffPolicy::Exponential`]; beyond this the
/// delay is pinned to `max` anyway.
const MAX_DOUBLINGS: u32 = 30;

/// How long a failed job waits before it becomes claimable again.
///
/// Every variant yields a delay that is non-decreasing in the number of
/// attempts already made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// The same delay after every failure.
    Fixed(Duration),
    /// `base * 2^(attempts - 1)`, capped at `max`.
    Exponential {
        /// Delay after the first failed attempt.
        base: Duration,
        /// Upper bound for any delay.
        max: Duration,
    },
    /// Explicit per-attempt delays; the last entry repeats. Build with
    /// [`BackoffPolicy::schedule`] to get the ordering check.
    Schedule(Vec<Duration>),
}

impl BackoffPolicy {
    /// Build a schedule policy, rejecting empty, negative or decreasing lists.
    pub fn schedule(delays: Vec<Duration>) -> AppResult<Self> {
        if delays.is_empty() {
            return Err(AppError::configuration("backoff schedule must not be empty"));
        }
        if delays.iter().any(|d| *d < Duration::zero()) {
            return Err(AppError::configuration(
                "backoff schedule must not contain negative delays",
            ));
        }
        if delays.windows(2).any(|w| w[1] < w[0]) {
            return Err(AppError::configuration(
                "backoff schedule must be non-decreasing",
            ));
        }
        Ok(Self::Schedule(delays))
    }

    /// Delay to apply after `attempts` executions have been started.
    ///
    /// `attempts` counts the attempt that just failed, so the first failure
    /// passes `1`. Zero is treated like one.
    pub fn delay(&self, attempts: u32) -> Duration {
        let attempts = attempts.max(1);
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { base, max } => {
                let doublings = (attempts - 1).min(MAX_DOUBLINGS);
                let millis = base
                    .num_milliseconds()
                    .saturating_mul(1_i64 << doublings);
                Duration::milliseconds(millis).min(*max)
            }
            Self::Schedule(delays) => {
                let index = (attempts as usize - 1).min(delays.len().saturating_sub(1));
                delays.get(index).copied().unwrap_or_else(Duration::zero)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::seconds(30),
            max: Duration::hours(6),
        }
    }
}
