//! Store mutation outcomes and listing filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What `complete` did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Completion {
    /// A one-shot job was removed.
    Deleted,
    /// A recurring job was re-armed for its next run.
    Rearmed {
        /// The new due time.
        perform_at: DateTime<Utc>,
    },
}

/// What `fail` did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// The job will be claimable again at `perform_at`.
    Retrying {
        /// Next eligible time.
        perform_at: DateTime<Utc>,
        /// Attempts made so far.
        attempts: u32,
    },
    /// The job is permanently failed.
    Failed {
        /// When the job was marked failed.
        failed_at: DateTime<Utc>,
        /// Attempts made so far.
        attempts: u32,
    },
}

impl FailureOutcome {
    /// Whether the job reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Coarse job state used by the operational listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Not failed and not currently claimed.
    Pending,
    /// Claimed by a worker (possibly a stale claim).
    Claimed,
    /// Permanently failed.
    Failed,
    /// Everything.
    #[default]
    All,
}

impl JobState {
    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Failed => "failed",
            Self::All => "all",
        }
    }

    /// Whether a job with these fields falls into this state.
    pub fn matches(
        &self,
        locked_at: Option<DateTime<Utc>>,
        failed_at: Option<DateTime<Utc>>,
    ) -> bool {
        match self {
            Self::Pending => failed_at.is_none() && locked_at.is_none(),
            Self::Claimed => failed_at.is_none() && locked_at.is_some(),
            Self::Failed => failed_at.is_some(),
            Self::All => true,
        }
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// State to select.
    pub state: JobState,
    /// Restrict to one queue.
    pub queue: Option<String>,
    /// Maximum rows returned.
    pub limit: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            state: JobState::All,
            queue: None,
            limit: 100,
        }
    }
}

/// Job counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Jobs waiting to be claimed.
    pub pending: i64,
    /// Jobs currently claimed.
    pub claimed: i64,
    /// Permanently failed jobs.
    pub failed: i64,
}
