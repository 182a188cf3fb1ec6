//! Shared test helpers for engine tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use jobmill_core::clock::ManualClock;
use jobmill_core::config::WorkerConfig;
use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_core::types::BackoffPolicy;
use jobmill_database::store::JobStore;
use jobmill_database::{MemoryJobStore, MemoryLockStore};
use jobmill_entity::job::{
    Completion, FailureOutcome, Job, JobFilter, JobId, JobStats, NewJob,
};
use jobmill_worker::{JobExecutionError, JobExecutor, JobHandler, JobQueue, RetryPolicy, WorkerRunner};

/// How a [`Scripted`] handler behaves on every call.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    Transient,
    Permanent,
    Panic,
}

/// Handler that counts its calls and follows a fixed script.
#[derive(Debug)]
pub struct Scripted {
    name: String,
    script: Script,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _job: &Job) -> Result<(), JobExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Succeed => Ok(()),
            Script::Transient => Err(JobExecutionError::transient("upstream timed out")),
            Script::Permanent => Err(JobExecutionError::permanent("payload rejected")),
            Script::Panic => panic!("handler panicked"),
        }
    }
}

/// Job store whose first `outages` claims fail as if the database were down.
#[derive(Debug)]
pub struct FlakyJobStore {
    inner: Arc<MemoryJobStore>,
    outages: usize,
    claims: AtomicUsize,
}

impl FlakyJobStore {
    pub fn new(inner: Arc<MemoryJobStore>, outages: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            outages,
            claims: AtomicUsize::new(0),
        })
    }

    /// Claim attempts seen so far, failed ones included.
    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn enqueue(&self, job: &NewJob) -> AppResult<JobId> {
        self.inner.enqueue(job).await
    }

    async fn find(&self, id: JobId) -> AppResult<Option<Job>> {
        self.inner.find(id).await
    }

    async fn claim_next(&self, queues: &[String], staleness: Duration) -> AppResult<Option<Job>> {
        if self.claims.fetch_add(1, Ordering::SeqCst) < self.outages {
            return Err(AppError::service_unavailable("connection refused"));
        }
        self.inner.claim_next(queues, staleness).await
    }

    async fn complete(&self, id: JobId) -> AppResult<Completion> {
        self.inner.complete(id).await
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        max_attempts: u32,
        backoff: &BackoffPolicy,
    ) -> AppResult<FailureOutcome> {
        self.inner.fail(id, error, max_attempts, backoff).await
    }

    async fn fail_permanently(&self, id: JobId, error: &str) -> AppResult<()> {
        self.inner.fail_permanently(id, error).await
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>> {
        self.inner.list(filter).await
    }

    async fn stats(&self) -> AppResult<JobStats> {
        self.inner.stats().await
    }

    async fn requeue(&self, id: JobId) -> AppResult<bool> {
        self.inner.requeue(id).await
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        self.inner.delete(id).await
    }

    async fn purge_failed(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        self.inner.purge_failed(older_than).await
    }

    async fn has_active(&self, name: &str) -> AppResult<bool> {
        self.inner.has_active(name).await
    }
}

/// Memory-backed engine on a manual clock.
pub struct TestEngine {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryJobStore>,
    pub locks: Arc<MemoryLockStore>,
    pub queue: Arc<JobQueue>,
}

impl TestEngine {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryJobStore::new(clock.clone()));
        let locks = Arc::new(MemoryLockStore::new(clock.clone()));
        let queue = Arc::new(JobQueue::new(store.clone()));
        Self {
            clock,
            store,
            locks,
            queue,
        }
    }

    /// A runner over this engine's queue with the given handlers.
    pub fn runner(&self, handlers: Vec<Arc<Scripted>>, retry: RetryPolicy) -> WorkerRunner {
        let mut executor = JobExecutor::new();
        for handler in handlers {
            executor.register(handler);
        }
        WorkerRunner::new(
            self.queue.clone(),
            Arc::new(executor),
            worker_config(),
            "test-worker".to_string(),
        )
        .with_retry(retry)
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        poll_interval_ms: 20,
        claim_staleness_seconds: 60,
        shutdown_grace_seconds: 5,
        ..WorkerConfig::default()
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}
