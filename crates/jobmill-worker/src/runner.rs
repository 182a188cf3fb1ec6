//! Worker runner: the main loop that claims due jobs and executes them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore, watch};
use tokio::time;
use tracing::{self, Instrument};

use jobmill_core::config::{RetryConfig, WorkerConfig};
use jobmill_core::error::ErrorKind;
use jobmill_core::result::AppResult;
use jobmill_core::types::BackoffPolicy;
use jobmill_entity::job::{Completion, FailureOutcome, Job, JobId};

use crate::executor::{JobExecutionError, JobExecutor};
use crate::queue::JobQueue;

/// Retry budget applied to retryable handler failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Claims after which a failing job is marked failed
    pub max_attempts: u32,
    /// Delay before the next attempt
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    /// Build the policy from the `[retry]` configuration section.
    pub fn from_config(config: &RetryConfig) -> AppResult<Self> {
        Ok(Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff()?,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The handler succeeded and the job was deleted or re-armed.
    Completed(Completion),
    /// The handler failed; the job is claimable again at `perform_at`.
    Retrying {
        /// Next eligible time
        perform_at: DateTime<Utc>,
    },
    /// The job is permanently failed.
    Failed {
        /// Error recorded on the job
        error: String,
    },
    /// The outcome could not be written back. The claim stays in place and
    /// the job is retried once it goes stale.
    Unrecorded {
        /// Store error
        error: String,
    },
}

/// Main worker runner that polls queues and executes jobs
#[derive(Debug)]
pub struct WorkerRunner {
    /// Job queue for claiming
    queue: Arc<JobQueue>,
    /// Job executor for dispatching
    executor: Arc<JobExecutor>,
    /// Worker configuration
    config: WorkerConfig,
    /// Retry policy for retryable failures
    retry: RetryPolicy,
    /// Worker identifier
    worker_id: String,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(
        queue: Arc<JobQueue>,
        executor: Arc<JobExecutor>,
        config: WorkerConfig,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            executor,
            config,
            retry: RetryPolicy::default(),
            worker_id,
        }
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Worker identifier used in logs
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Start the worker runner; runs until the cancel signal is received.
    ///
    /// At most `concurrency` jobs run at once; a job is only claimed when a
    /// slot is free. Idle workers wake up on the poll interval or when a job
    /// is enqueued through the same queue.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            worker = %self.worker_id,
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            queues = ?self.config.queues,
            "Worker started"
        );

        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let wakeup = self.queue.wakeup();
        let staleness = self.config.claim_staleness();
        let mut error_delay: Option<Duration> = None;

        loop {
            if *cancel.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.claim(&self.config.queues, staleness).await {
                Ok(Some(job)) => {
                    error_delay = None;
                    let span = tracing::info_span!(
                        "job",
                        worker = %self.worker_id,
                        job.id = %job.id,
                        job.name = %job.name,
                        attempt = job.number_attempts,
                    );
                    let queue = Arc::clone(&self.queue);
                    let executor = Arc::clone(&self.executor);
                    let retry = self.retry.clone();

                    tokio::spawn(
                        async move {
                            let _permit = permit;
                            process(&queue, &executor, &retry, job).await;
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => {
                    drop(permit);
                    error_delay = None;
                    tracing::trace!(worker = %self.worker_id, "No jobs due");
                    if Self::idle(&mut cancel, &wakeup, self.config.poll_interval()).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    let delay = self.next_error_delay(error_delay);
                    error_delay = Some(delay);
                    let retry_in_ms = delay.as_millis() as u64;
                    if e.is_unavailable() {
                        tracing::warn!(
                            worker = %self.worker_id,
                            retry_in_ms,
                            "Job store unavailable, backing off: {}",
                            e
                        );
                    } else {
                        tracing::error!(
                            worker = %self.worker_id,
                            retry_in_ms,
                            "Failed to claim job: {}",
                            e
                        );
                    }
                    if Self::sleep(&mut cancel, delay).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker = %self.worker_id, "Worker waiting for in-flight jobs to complete");

        let all_slots = u32::try_from(concurrency).unwrap_or(u32::MAX);
        if time::timeout(self.config.shutdown_grace(), semaphore.acquire_many(all_slots))
            .await
            .is_err()
        {
            tracing::warn!(
                worker = %self.worker_id,
                "Shutdown grace period elapsed with jobs still running; their claims will go stale"
            );
        }

        tracing::info!(worker = %self.worker_id, "Worker shut down complete");
    }

    /// Claim and process a single job inline.
    ///
    /// Returns `Ok(None)` when nothing is due. Only a failing claim is an
    /// error; outcomes that could not be written back are reported as
    /// [`RunOutcome::Unrecorded`].
    pub async fn run_once(&self) -> AppResult<Option<(JobId, RunOutcome)>> {
        let Some(job) = self
            .queue
            .claim(&self.config.queues, self.config.claim_staleness())
            .await?
        else {
            return Ok(None);
        };

        let job_id = job.id;
        let span = tracing::info_span!(
            "job",
            worker = %self.worker_id,
            job.id = %job.id,
            job.name = %job.name,
            attempt = job.number_attempts,
        );
        let outcome = process(&self.queue, &self.executor, &self.retry, job)
            .instrument(span)
            .await;
        Ok(Some((job_id, outcome)))
    }

    fn next_error_delay(&self, previous: Option<Duration>) -> Duration {
        let ceiling = self.config.error_backoff_max().max(self.config.poll_interval());
        match previous {
            None => self.config.poll_interval().min(ceiling),
            Some(delay) => delay.saturating_mul(2).min(ceiling),
        }
    }

    /// Wait for the poll interval or a wakeup. Returns true on shutdown.
    async fn idle(cancel: &mut watch::Receiver<bool>, wakeup: &Notify, delay: Duration) -> bool {
        tokio::select! {
            changed = cancel.changed() => changed.is_err() || *cancel.borrow(),
            _ = time::sleep(delay) => false,
            _ = wakeup.notified() => false,
        }
    }

    /// Wait for `delay`. Returns true on shutdown.
    async fn sleep(cancel: &mut watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            changed = cancel.changed() => changed.is_err() || *cancel.borrow(),
            _ = time::sleep(delay) => false,
        }
    }
}

/// Execute a claimed job and write the outcome back.
async fn process(
    queue: &JobQueue,
    executor: &JobExecutor,
    retry: &RetryPolicy,
    job: Job,
) -> RunOutcome {
    let started = Instant::now();
    tracing::info!(queue = %job.queue, "Processing job");

    let result = executor.execute(&job).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(()) => match queue.complete(job.id).await {
            Ok(completion) => {
                tracing::info!(elapsed_ms, ?completion, "Job completed successfully");
                RunOutcome::Completed(completion)
            }
            Err(e) if e.kind == ErrorKind::Configuration => {
                // The stored frequency no longer parses.
                tracing::error!(elapsed_ms, "Cannot re-arm job: {}", e);
                mark_failed(queue, job.id, e.to_string()).await
            }
            Err(e) => {
                tracing::error!(elapsed_ms, "Failed to mark job as completed: {}", e);
                RunOutcome::Unrecorded {
                    error: e.to_string(),
                }
            }
        },
        Err(err) if err.is_retryable() => {
            let error = err.to_string();
            match queue
                .fail(job.id, &error, retry.max_attempts, &retry.backoff)
                .await
            {
                Ok(FailureOutcome::Retrying {
                    perform_at,
                    attempts,
                }) => {
                    tracing::warn!(
                        elapsed_ms,
                        attempts,
                        max_attempts = retry.max_attempts,
                        %perform_at,
                        "Job failed, will retry: {}",
                        error
                    );
                    RunOutcome::Retrying { perform_at }
                }
                Ok(FailureOutcome::Failed { attempts, .. }) => {
                    tracing::error!(elapsed_ms, attempts, "Job failed, attempts exhausted: {}", error);
                    RunOutcome::Failed { error }
                }
                Err(e) => {
                    tracing::error!(elapsed_ms, "Failed to record job failure: {}", e);
                    RunOutcome::Unrecorded {
                        error: e.to_string(),
                    }
                }
            }
        }
        Err(err) => {
            if let JobExecutionError::UnknownHandler(name) = &err {
                tracing::error!(job.name = %name, "No handler registered for claimed job");
            } else {
                tracing::error!(elapsed_ms, "Job failed permanently: {}", err);
            }
            mark_failed(queue, job.id, err.to_string()).await
        }
    }
}

async fn mark_failed(queue: &JobQueue, job_id: JobId, error: String) -> RunOutcome {
    match queue.fail_permanently(job_id, &error).await {
        Ok(()) => RunOutcome::Failed { error },
        Err(e) => {
            tracing::error!("Failed to mark job as failed: {}", e);
            RunOutcome::Unrecorded {
                error: e.to_string(),
            }
        }
    }
}
