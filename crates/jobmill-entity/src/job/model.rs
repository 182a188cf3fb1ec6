//! Job entity model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_core::types::BackoffPolicy;

use super::frequency::Frequency;
use super::outcome::FailureOutcome;

/// Queue used when the producer does not name one.
pub const DEFAULT_QUEUE: &str = "default";

const ANCHOR_CATCH_UP_DAYS: i64 = 8;

/// Monotonically increasing job identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A unit of deferred background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Name of the handler to invoke (e.g. `"feeds.fetch"`).
    pub name: String,
    /// Handler payload, opaque to the engine.
    pub args: serde_json::Value,
    /// Queue name.
    pub queue: String,
    /// The job is claimable only once `now >= perform_at`.
    pub perform_at: DateTime<Utc>,
    /// When a worker claimed the job, if it is claimed.
    pub locked_at: Option<DateTime<Utc>>,
    /// Number of executions started.
    pub number_attempts: i32,
    /// Last captured failure message; empty if none.
    pub last_error: String,
    /// Set once the job is permanently failed.
    pub failed_at: Option<DateTime<Utc>>,
    /// Recurrence rule; presence makes the job recurring.
    pub frequency: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job re-arms instead of being deleted on success.
    pub fn is_recurring(&self) -> bool {
        self.frequency.is_some()
    }

    /// Whether the job reached its terminal failed state.
    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Whether a claimant may take this job at `now`.
    ///
    /// A claim older than `staleness` is treated as abandoned.
    pub fn is_claimable(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        if self.is_failed() || self.perform_at > now {
            return false;
        }
        match self.locked_at {
            None => true,
            Some(locked_at) => locked_at < now - staleness,
        }
    }

    /// Parse the stored recurrence rule.
    pub fn parsed_frequency(&self) -> AppResult<Option<Frequency>> {
        self.frequency.as_deref().map(str::parse::<Frequency>).transpose()
    }

    /// The `perform_at` a recurring job is re-armed with after success.
    ///
    /// Planning starts from the job's own `perform_at` so that late
    /// execution does not make the schedule drift. Periods that already
    /// elapsed while nobody ran the job collapse into a single run: the
    /// result is always after both the old `perform_at` and `now`.
    ///
    /// A rule whose next run is not a representable timestamp is a
    /// `Configuration` error.
    pub fn next_perform_at(&self, now: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
        let Some(frequency) = self.parsed_frequency()? else {
            return Ok(None);
        };

        let next = match frequency.period() {
            Some(period) => {
                let step = period.num_seconds().max(1);
                let elapsed = (now - self.perform_at).num_seconds();
                let periods = if elapsed < 0 { 1 } else { elapsed / step + 1 };
                self.perform_at
                    .checked_add_signed(Duration::seconds(step.saturating_mul(periods)))
            }
            None => {
                // Anchored rules repeat at most weekly, so stepping from a
                // week before `now` lands on the same occurrence.
                let start = now
                    .checked_sub_signed(Duration::days(ANCHOR_CATCH_UP_DAYS))
                    .filter(|start| *start > self.perform_at)
                    .unwrap_or(self.perform_at);
                let mut next = frequency.next_after(start);
                while let Some(at) = next.filter(|at| *at <= now) {
                    next = frequency.next_after(at);
                }
                next
            }
        };

        next.map(Some).ok_or_else(|| {
            AppError::configuration(format!(
                "Frequency '{frequency}' has no run after {}",
                self.perform_at
            ))
        })
    }

    /// Decide what a transient failure does to this (already claimed) job.
    pub fn plan_failure(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
        backoff: &BackoffPolicy,
    ) -> FailureOutcome {
        let attempts = u32::try_from(self.number_attempts).unwrap_or(0);
        if attempts >= max_attempts {
            FailureOutcome::Failed {
                failed_at: now,
                attempts,
            }
        } else {
            FailureOutcome::Retrying {
                perform_at: now + backoff.delay(attempts),
                attempts,
            }
        }
    }
}

/// Parameters for creating a new job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Handler name.
    pub name: String,
    /// Handler payload.
    pub args: serde_json::Value,
    /// Queue name.
    pub queue: String,
    /// First eligible time; `None` means now.
    pub perform_at: Option<DateTime<Utc>>,
    /// Canonical recurrence rule.
    pub frequency: Option<String>,
}

impl NewJob {
    /// A one-shot job on the default queue, due immediately.
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
            queue: DEFAULT_QUEUE.to_string(),
            perform_at: None,
            frequency: None,
        }
    }

    /// Serialize `args` into a new job.
    pub fn with_args<A: Serialize>(name: impl Into<String>, args: &A) -> AppResult<Self> {
        let args = serde_json::to_value(args)
            .map_err(|e| AppError::validation(format!("Job arguments are not serializable: {e}")))?;
        Ok(Self::new(name, args))
    }

    /// Put the job on another queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Delay the job until `perform_at`.
    pub fn perform_at(mut self, perform_at: DateTime<Utc>) -> Self {
        self.perform_at = Some(perform_at);
        self
    }

    /// Make the job recurring.
    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency.to_string());
        self
    }

    /// Check the fields every store requires.
    ///
    /// Malformed frequencies are configuration errors, caught here rather
    /// than when the job first completes.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("Job name must not be empty"));
        }
        if self.queue.trim().is_empty() {
            return Err(AppError::validation("Job queue must not be empty"));
        }
        if let Some(frequency) = &self.frequency {
            frequency.parse::<Frequency>()?;
        }
        Ok(())
    }
}
