//! Job queue facade for producers, workers and operators.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing;

use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_core::types::BackoffPolicy;
use jobmill_database::store::JobStore;
use jobmill_entity::job::{Completion, FailureOutcome, Job, JobFilter, JobId, JobStats, NewJob};

/// Job queue wrapping a [`JobStore`].
///
/// When built with the set of registered handler names, `enqueue` rejects
/// jobs nobody could run. Every successful `enqueue` also wakes idle
/// workers of this process.
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Backing store
    store: Arc<dyn JobStore>,
    /// Names accepted by `enqueue`; `None` accepts anything
    known_names: Option<Arc<HashSet<String>>>,
    /// Wakes idle runners of this process
    wakeup: Arc<Notify>,
}

impl JobQueue {
    /// Create a new job queue
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            known_names: None,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Only accept jobs whose name is in `names`.
    pub fn with_known_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_names = Some(Arc::new(names.into_iter().map(Into::into).collect()));
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Notified whenever a job is enqueued through this queue.
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Enqueue a new job
    pub async fn enqueue(&self, job: NewJob) -> AppResult<JobId> {
        if let Some(names) = &self.known_names {
            if !names.contains(&job.name) {
                return Err(AppError::configuration(format!(
                    "No handler registered for job '{}'",
                    job.name
                )));
            }
        }

        let id = self.store.enqueue(&job).await?;
        self.wakeup.notify_waiters();

        tracing::debug!(
            job.id = %id,
            job.name = %job.name,
            queue = %job.queue,
            frequency = ?job.frequency,
            "Enqueued job"
        );
        Ok(id)
    }

    /// Serialize `args` and enqueue a one-shot job on the default queue.
    pub async fn push<A: Serialize>(&self, name: &str, args: &A) -> AppResult<JobId> {
        self.enqueue(NewJob::with_args(name, args)?).await
    }

    /// Claim the next due job from `queues`
    pub async fn claim(&self, queues: &[String], staleness: Duration) -> AppResult<Option<Job>> {
        let job = self.store.claim_next(queues, staleness).await?;
        if let Some(job) = &job {
            tracing::debug!(
                job.id = %job.id,
                job.name = %job.name,
                queue = %job.queue,
                attempt = job.number_attempts,
                "Claimed job"
            );
        }
        Ok(job)
    }

    /// Mark a job as completed successfully
    pub async fn complete(&self, job_id: JobId) -> AppResult<Completion> {
        let completion = self.store.complete(job_id).await?;
        tracing::debug!(job.id = %job_id, ?completion, "Job completed");
        Ok(completion)
    }

    /// Record a retryable failure
    pub async fn fail(
        &self,
        job_id: JobId,
        error: &str,
        max_attempts: u32,
        backoff: &BackoffPolicy,
    ) -> AppResult<FailureOutcome> {
        let outcome = self.store.fail(job_id, error, max_attempts, backoff).await?;
        tracing::debug!(job.id = %job_id, ?outcome, "Job failure recorded");
        Ok(outcome)
    }

    /// Mark a job as permanently failed
    pub async fn fail_permanently(&self, job_id: JobId, error: &str) -> AppResult<()> {
        self.store.fail_permanently(job_id, error).await?;
        tracing::debug!(job.id = %job_id, error, "Job failed permanently");
        Ok(())
    }

    /// Fetch one job
    pub async fn find(&self, job_id: JobId) -> AppResult<Option<Job>> {
        self.store.find(job_id).await
    }

    /// List jobs
    pub async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>> {
        self.store.list(filter).await
    }

    /// Requeue a failed job
    pub async fn requeue(&self, job_id: JobId) -> AppResult<()> {
        if !self.store.requeue(job_id).await? {
            return Err(AppError::conflict(format!(
                "Job {job_id} does not exist or has not failed"
            )));
        }
        self.wakeup.notify_waiters();
        tracing::info!(job.id = %job_id, "Job requeued");
        Ok(())
    }

    /// Delete a job so that it is never claimed again
    pub async fn delete(&self, job_id: JobId) -> AppResult<()> {
        if !self.store.delete(job_id).await? {
            return Err(AppError::not_found(format!("Job {job_id} not found")));
        }
        tracing::info!(job.id = %job_id, "Job deleted");
        Ok(())
    }

    /// Delete jobs that failed before `older_than`
    pub async fn purge_failed(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let purged = self.store.purge_failed(older_than).await?;
        tracing::info!(purged, %older_than, "Purged failed jobs");
        Ok(purged)
    }

    /// Get queue statistics
    pub async fn stats(&self) -> AppResult<JobStats> {
        self.store.stats().await
    }
}
