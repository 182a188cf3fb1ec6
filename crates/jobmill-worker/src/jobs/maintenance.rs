//! Failed-job retention and lock table cleanup.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing;

use jobmill_core::clock::Clock;
use jobmill_core::config::MaintenanceConfig;
use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_database::store::{JobStore, LockStore};
use jobmill_entity::job::{Frequency, Job, JobId, NewJob};

use crate::executor::{JobExecutionError, JobHandler};
use crate::lease::with_lease;
use crate::queue::JobQueue;

/// Name the maintenance job is registered and enqueued under.
pub const MAINTENANCE_JOB: &str = "jobmill.maintenance";

const INSTALL_LEASE_TTL: i64 = 60;

/// Deletes failed jobs past their retention and expired lock rows.
#[derive(Debug)]
pub struct MaintenanceJobHandler {
    /// Job store
    jobs: Arc<dyn JobStore>,
    /// Lock store
    locks: Arc<dyn LockStore>,
    /// Time source for the retention cutoff
    clock: Arc<dyn Clock>,
    /// How long failed jobs are kept
    retention: Duration,
}

impl MaintenanceJobHandler {
    /// Create a new maintenance job handler
    pub fn new(
        jobs: Arc<dyn JobStore>,
        locks: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
        config: &MaintenanceConfig,
    ) -> Self {
        Self {
            jobs,
            locks,
            clock,
            retention: Duration::days(i64::from(config.failed_retention_days)),
        }
    }

    /// Enqueue the recurring maintenance job unless one is already active.
    ///
    /// Every worker process calls this at startup; a short lease keeps two
    /// processes starting together from both installing it. Returns the id
    /// of the job this call created, if any.
    pub async fn install(
        queue: &JobQueue,
        locks: &dyn LockStore,
        config: &MaintenanceConfig,
        clock: &dyn Clock,
    ) -> AppResult<Option<JobId>> {
        let frequency: Frequency = config.frequency.parse()?;
        let first_run = frequency.next_after(clock.now()).ok_or_else(|| {
            AppError::configuration(format!("Maintenance frequency '{frequency}' has no next run"))
        })?;

        let installed = with_lease(
            locks,
            MAINTENANCE_JOB,
            Duration::seconds(INSTALL_LEASE_TTL),
            || async {
                if queue.store().has_active(MAINTENANCE_JOB).await? {
                    return Ok(None);
                }
                let job = NewJob::new(MAINTENANCE_JOB, serde_json::json!({}))
                    .queue(config.queue.clone())
                    .perform_at(first_run)
                    .frequency(frequency);
                queue.enqueue(job).await.map(Some)
            },
        )
        .await?;

        let id = installed.transpose()?.flatten();
        match id {
            Some(id) => tracing::info!(job.id = %id, %frequency, "Installed maintenance job"),
            None => tracing::debug!("Maintenance job already installed"),
        }
        Ok(id)
    }
}

#[async_trait]
impl JobHandler for MaintenanceJobHandler {
    fn name(&self) -> &str {
        MAINTENANCE_JOB
    }

    async fn execute(&self, _job: &Job) -> Result<(), JobExecutionError> {
        let cutoff = self.clock.now() - self.retention;

        let purged_jobs = self
            .jobs
            .purge_failed(cutoff)
            .await
            .map_err(|e| JobExecutionError::transient(format!("Purging failed jobs: {e}")))?;

        let purged_locks = self
            .locks
            .purge_expired()
            .await
            .map_err(|e| JobExecutionError::transient(format!("Purging expired locks: {e}")))?;

        tracing::info!(purged_jobs, purged_locks, %cutoff, "Maintenance complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use jobmill_core::clock::ManualClock;
    use jobmill_database::{MemoryJobStore, MemoryLockStore};
    use jobmill_entity::job::DEFAULT_QUEUE;

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let queue = JobQueue::new(Arc::new(MemoryJobStore::new(clock.clone())));
        let locks = MemoryLockStore::new(clock.clone());
        let config = MaintenanceConfig::default();

        let first = MaintenanceJobHandler::install(&queue, &locks, &config, clock.as_ref())
            .await
            .unwrap()
            .unwrap();
        let second = MaintenanceJobHandler::install(&queue, &locks, &config, clock.as_ref())
            .await
            .unwrap();
        assert_eq!(second, None);
        assert!(locks.is_empty());

        let job = queue.find(first).await.unwrap().unwrap();
        assert_eq!(job.queue, DEFAULT_QUEUE);
        assert_eq!(job.frequency.as_deref(), Some("daily at 03:00"));
        assert_eq!(job.perform_at, Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_purges_old_failures_and_expired_locks() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(clock.clone()));
        let locks: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new(clock.clone()));

        let old = jobs.enqueue(&NewJob::new("mail.send", serde_json::json!({}))).await.unwrap();
        jobs.fail_permanently(old, "bounced").await.unwrap();
        locks.acquire("feed:1", Duration::seconds(5)).await.unwrap();

        clock.advance(Duration::days(8));
        let recent = jobs.enqueue(&NewJob::new("mail.send", serde_json::json!({}))).await.unwrap();
        jobs.fail_permanently(recent, "bounced").await.unwrap();

        let handler = MaintenanceJobHandler::new(
            jobs.clone(),
            locks.clone(),
            clock.clone(),
            &MaintenanceConfig::default(),
        );
        let job = jobs.find(recent).await.unwrap().unwrap();
        handler.execute(&job).await.unwrap();

        assert!(jobs.find(old).await.unwrap().is_none());
        assert!(jobs.find(recent).await.unwrap().is_some());
        assert_eq!(locks.purge_expired().await.unwrap(), 0);
    }
}
