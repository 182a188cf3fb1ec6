//! Store traits shared by the PostgreSQL and in-memory backends.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use jobmill_core::result::AppResult;
use jobmill_core::types::BackoffPolicy;
use jobmill_entity::job::{Completion, FailureOutcome, Job, JobFilter, JobId, JobStats, NewJob};
use jobmill_entity::lock::Lock;

/// Durable table of pending, claimed and failed jobs.
///
/// Every mutation reads the current time from the store's clock.
#[async_trait]
pub trait JobStore: Send + Sync + fmt::Debug + 'static {
    /// Insert a new job. Fails with a validation error for an empty name and
    /// a configuration error for a malformed frequency.
    async fn enqueue(&self, job: &NewJob) -> AppResult<JobId>;

    /// Fetch a job by id.
    async fn find(&self, id: JobId) -> AppResult<Option<Job>>;

    /// Atomically claim the next due job on one of `queues`.
    ///
    /// Candidates are due (`perform_at <= now`), not failed, and either
    /// unclaimed or claimed longer than `staleness` ago. They are offered
    /// in `(perform_at, id)` order. The claim sets `locked_at = now` and
    /// increments `number_attempts`; concurrent claimants never receive the
    /// same job.
    async fn claim_next(&self, queues: &[String], staleness: Duration) -> AppResult<Option<Job>>;

    /// Delete a one-shot job, or re-arm a recurring one with a fresh
    /// `perform_at`, no claim and zeroed attempts.
    async fn complete(&self, id: JobId) -> AppResult<Completion>;

    /// Record a transient failure: retry after `backoff` or, once
    /// `number_attempts >= max_attempts`, mark the job failed.
    async fn fail(
        &self,
        id: JobId,
        error: &str,
        max_attempts: u32,
        backoff: &BackoffPolicy,
    ) -> AppResult<FailureOutcome>;

    /// Mark the job failed right away, skipping remaining retries.
    async fn fail_permanently(&self, id: JobId, error: &str) -> AppResult<()>;

    /// List jobs for operators.
    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>>;

    /// Count jobs by state.
    async fn stats(&self) -> AppResult<JobStats>;

    /// Make a failed job claimable again right away. Returns `false` if the
    /// job does not exist or is not failed.
    async fn requeue(&self, id: JobId) -> AppResult<bool>;

    /// Delete a job regardless of its state. Returns `false` if it did not exist.
    async fn delete(&self, id: JobId) -> AppResult<bool>;

    /// Delete jobs that failed before `older_than`. Returns the number removed.
    async fn purge_failed(&self, older_than: DateTime<Utc>) -> AppResult<u64>;

    /// Whether a non-failed job with this name exists.
    async fn has_active(&self, name: &str) -> AppResult<bool>;
}

/// Keyed mutex with TTL expiry.
///
/// `acquire` is a non-blocking try-lock. Store errors are returned as errors
/// and never as a granted lease.
#[async_trait]
pub trait LockStore: Send + Sync + fmt::Debug + 'static {
    /// Take the lease on `key` for `ttl`. Returns `false` if someone else
    /// holds a live lease; an expired lease is replaced.
    async fn acquire(&self, key: &str, ttl: Duration) -> AppResult<bool>;

    /// Drop the lease on `key`. Releasing an unheld key is a no-op.
    async fn release(&self, key: &str) -> AppResult<()>;

    /// Push back the expiry of a live lease to `now + ttl`. Returns `false`
    /// if there is no live lease to renew.
    async fn renew(&self, key: &str, ttl: Duration) -> AppResult<bool>;

    /// Live leases, ordered by key.
    async fn list(&self) -> AppResult<Vec<Lock>>;

    /// Physically remove expired rows. Returns the number removed.
    async fn purge_expired(&self) -> AppResult<u64>;
}

/// Reject keys and TTLs no backend can honour.
pub(crate) fn validate_lease(key: &str, ttl: Duration) -> AppResult<()> {
    if key.is_empty() {
        return Err(jobmill_core::AppError::validation("Lock key must not be empty"));
    }
    if ttl <= Duration::zero() {
        return Err(jobmill_core::AppError::validation(format!(
            "Lock TTL must be positive, got {ttl}"
        )));
    }
    Ok(())
}
