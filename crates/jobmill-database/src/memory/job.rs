//! In-memory job store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use jobmill_core::clock::Clock;
use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_core::types::BackoffPolicy;
use jobmill_entity::job::{
    Completion, FailureOutcome, Job, JobFilter, JobId, JobState, JobStats, NewJob,
};

use crate::store::JobStore;

#[derive(Debug, Default)]
struct Table {
    last_id: i64,
    jobs: BTreeMap<JobId, Job>,
}

impl Table {
    fn get_mut(&mut self, id: JobId) -> AppResult<&mut Job> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }
}

/// Job store holding every job behind a single async mutex.
#[derive(Debug, Clone)]
pub struct MemoryJobStore {
    table: Arc<Mutex<Table>>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    /// Create an empty job store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            clock,
        }
    }

    /// Number of stored jobs in any state.
    pub async fn len(&self) -> usize {
        self.table.lock().await.jobs.len()
    }

    /// Whether no jobs are stored.
    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: &NewJob) -> AppResult<JobId> {
        job.validate()?;
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        table.last_id += 1;
        let id = JobId(table.last_id);
        table.jobs.insert(
            id,
            Job {
                id,
                name: job.name.clone(),
                args: job.args.clone(),
                queue: job.queue.clone(),
                perform_at: job.perform_at.unwrap_or(now),
                locked_at: None,
                number_attempts: 0,
                last_error: String::new(),
                failed_at: None,
                frequency: job.frequency.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn find(&self, id: JobId) -> AppResult<Option<Job>> {
        Ok(self.table.lock().await.jobs.get(&id).cloned())
    }

    async fn claim_next(&self, queues: &[String], staleness: Duration) -> AppResult<Option<Job>> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        let candidate = table
            .jobs
            .values()
            .filter(|job| queues.contains(&job.queue) && job.is_claimable(now, staleness))
            .min_by_key(|job| (job.perform_at, job.id))
            .map(|job| job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let job = table.get_mut(id)?;
        job.locked_at = Some(now);
        job.number_attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: JobId) -> AppResult<Completion> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let job = table.get_mut(id)?;

        match job.next_perform_at(now)? {
            Some(perform_at) => {
                job.perform_at = perform_at;
                job.locked_at = None;
                job.number_attempts = 0;
                job.last_error.clear();
                job.updated_at = now;
                Ok(Completion::Rearmed { perform_at })
            }
            None => {
                table.jobs.remove(&id);
                Ok(Completion::Deleted)
            }
        }
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        max_attempts: u32,
        backoff: &BackoffPolicy,
    ) -> AppResult<FailureOutcome> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let job = table.get_mut(id)?;

        let outcome = job.plan_failure(now, max_attempts, backoff);
        job.last_error = error.to_string();
        job.locked_at = None;
        job.updated_at = now;
        match outcome {
            FailureOutcome::Retrying { perform_at, .. } => job.perform_at = perform_at,
            FailureOutcome::Failed { failed_at, .. } => job.failed_at = Some(failed_at),
        }
        Ok(outcome)
    }

    async fn fail_permanently(&self, id: JobId, error: &str) -> AppResult<()> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let job = table.get_mut(id)?;

        job.last_error = error.to_string();
        job.locked_at = None;
        job.failed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>> {
        let table = self.table.lock().await;
        let mut jobs: Vec<Job> = table
            .jobs
            .values()
            .filter(|job| filter.state.matches(job.locked_at, job.failed_at))
            .filter(|job| filter.queue.as_ref().is_none_or(|queue| &job.queue == queue))
            .cloned()
            .collect();

        jobs.sort_by_key(|job| (job.perform_at, job.id));
        jobs.truncate(usize::try_from(filter.limit).unwrap_or(0));
        Ok(jobs)
    }

    async fn stats(&self) -> AppResult<JobStats> {
        let table = self.table.lock().await;
        let mut stats = JobStats::default();
        for job in table.jobs.values() {
            if JobState::Failed.matches(job.locked_at, job.failed_at) {
                stats.failed += 1;
            } else if JobState::Claimed.matches(job.locked_at, job.failed_at) {
                stats.claimed += 1;
            } else {
                stats.pending += 1;
            }
        }
        Ok(stats)
    }

    async fn requeue(&self, id: JobId) -> AppResult<bool> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        match table.jobs.get_mut(&id) {
            Some(job) if job.is_failed() => {
                job.failed_at = None;
                job.locked_at = None;
                job.number_attempts = 0;
                job.perform_at = now;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        Ok(self.table.lock().await.jobs.remove(&id).is_some())
    }

    async fn purge_failed(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let mut table = self.table.lock().await;
        let before = table.jobs.len();
        table
            .jobs
            .retain(|_, job| job.failed_at.is_none_or(|failed_at| failed_at >= older_than));
        Ok((before - table.jobs.len()) as u64)
    }

    async fn has_active(&self, name: &str) -> AppResult<bool> {
        let table = self.table.lock().await;
        Ok(table
            .jobs
            .values()
            .any(|job| job.name == name && !job.is_failed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobmill_core::clock::ManualClock;
    use jobmill_core::error::ErrorKind;

    fn make_store() -> (Arc<ManualClock>, MemoryJobStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let store = MemoryJobStore::new(clock.clone());
        (clock, store)
    }

    fn queues() -> Vec<String> {
        vec!["default".to_string()]
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_name() {
        let (_clock, store) = make_store();
        let err = store
            .enqueue(&NewJob::new("", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_claim_orders_by_perform_at_then_id() {
        let (clock, store) = make_store();
        let now = clock.now();

        let late = store
            .enqueue(&NewJob::new("a", serde_json::json!(1)).perform_at(now))
            .await
            .unwrap();
        let early = store
            .enqueue(&NewJob::new("b", serde_json::json!(2)).perform_at(now - Duration::minutes(1)))
            .await
            .unwrap();
        let tie = store
            .enqueue(&NewJob::new("c", serde_json::json!(3)).perform_at(now))
            .await
            .unwrap();

        let staleness = Duration::hours(1);
        let order: Vec<JobId> = [
            store.claim_next(&queues(), staleness).await.unwrap(),
            store.claim_next(&queues(), staleness).await.unwrap(),
            store.claim_next(&queues(), staleness).await.unwrap(),
        ]
        .into_iter()
        .map(|job| job.unwrap().id)
        .collect();

        assert_eq!(order, vec![early, late, tie]);
        assert!(store.claim_next(&queues(), staleness).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_queues_and_due_time() {
        let (clock, store) = make_store();
        store
            .enqueue(&NewJob::new("mail.send", serde_json::json!({})).queue("mailers"))
            .await
            .unwrap();
        store
            .enqueue(
                &NewJob::new("feeds.fetch", serde_json::json!({}))
                    .perform_at(clock.now() + Duration::seconds(30)),
            )
            .await
            .unwrap();

        let staleness = Duration::hours(1);
        assert!(store.claim_next(&queues(), staleness).await.unwrap().is_none());

        clock.advance(Duration::seconds(30));
        let job = store.claim_next(&queues(), staleness).await.unwrap().unwrap();
        assert_eq!(job.name, "feeds.fetch");
        assert_eq!(job.number_attempts, 1);
        assert_eq!(job.locked_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_stale_claim_is_reclaimed() {
        let (clock, store) = make_store();
        let id = store
            .enqueue(&NewJob::new("feeds.fetch", serde_json::json!({})))
            .await
            .unwrap();
        let staleness = Duration::minutes(10);

        assert!(store.claim_next(&queues(), staleness).await.unwrap().is_some());
        clock.advance(Duration::minutes(10));
        assert!(store.claim_next(&queues(), staleness).await.unwrap().is_none());

        clock.advance(Duration::seconds(1));
        let job = store.claim_next(&queues(), staleness).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.number_attempts, 2);
    }

    #[tokio::test]
    async fn test_complete_deletes_one_shot_and_rearms_recurring() {
        let (clock, store) = make_store();
        let start = clock.now();
        let one_shot = store
            .enqueue(&NewJob::new("mail.send", serde_json::json!({})))
            .await
            .unwrap();
        let recurring = store
            .enqueue(
                &NewJob::new("feeds.sync", serde_json::json!({}))
                    .frequency("every 15 seconds".parse().unwrap()),
            )
            .await
            .unwrap();

        let staleness = Duration::hours(1);
        store.claim_next(&queues(), staleness).await.unwrap();
        store.claim_next(&queues(), staleness).await.unwrap();
        clock.advance(Duration::seconds(2));

        assert_eq!(store.complete(one_shot).await.unwrap(), Completion::Deleted);
        assert_eq!(
            store.complete(recurring).await.unwrap(),
            Completion::Rearmed {
                perform_at: start + Duration::seconds(15)
            }
        );

        assert!(store.find(one_shot).await.unwrap().is_none());
        let job = store.find(recurring).await.unwrap().unwrap();
        assert_eq!(job.number_attempts, 0);
        assert_eq!(job.locked_at, None);
    }

    #[tokio::test]
    async fn test_fail_until_terminal() {
        let (clock, store) = make_store();
        let id = store
            .enqueue(&NewJob::new("feeds.fetch", serde_json::json!({})))
            .await
            .unwrap();
        let backoff = BackoffPolicy::Fixed(Duration::seconds(30));
        let staleness = Duration::hours(1);

        for attempt in 1..=3u32 {
            let job = store.claim_next(&queues(), staleness).await.unwrap().unwrap();
            assert_eq!(job.number_attempts, attempt as i32);
            let outcome = store.fail(id, "timeout", 3, &backoff).await.unwrap();
            assert_eq!(outcome.is_terminal(), attempt == 3);
            clock.advance(Duration::seconds(30));
        }

        let job = store.find(id).await.unwrap().unwrap();
        assert!(job.is_failed());
        assert_eq!(job.last_error, "timeout");
        assert!(store.claim_next(&queues(), staleness).await.unwrap().is_none());

        assert!(store.requeue(id).await.unwrap());
        let job = store.find(id).await.unwrap().unwrap();
        assert_eq!(job.number_attempts, 0);
        assert_eq!(job.perform_at, clock.now());
        assert!(store.claim_next(&queues(), staleness).await.unwrap().is_some());
        assert!(!store.requeue(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claimers_get_one_job() {
        let (_clock, store) = make_store();
        store
            .enqueue(&NewJob::new("mail.send", serde_json::json!({})))
            .await
            .unwrap();

        let claims = futures::future::join_all((0..10).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim_next(&queues(), Duration::hours(1)).await })
        }))
        .await;

        let won = claims
            .into_iter()
            .filter(|claim| matches!(claim, Ok(Ok(Some(_)))))
            .count();
        assert_eq!(won, 1);
    }

    #[tokio::test]
    async fn test_list_stats_and_purge() {
        let (clock, store) = make_store();
        let failed = store
            .enqueue(&NewJob::new("a", serde_json::json!({})))
            .await
            .unwrap();
        store
            .enqueue(&NewJob::new("b", serde_json::json!({})).queue("other"))
            .await
            .unwrap();
        store.fail_permanently(failed, "bad payload").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.pending, stats.claimed, stats.failed), (1, 0, 1));

        let listed = store
            .list(&JobFilter {
                state: JobState::Failed,
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.has_active("b").await.unwrap());
        assert!(!store.has_active("a").await.unwrap());

        assert_eq!(store.purge_failed(clock.now()).await.unwrap(), 0);
        clock.advance(Duration::days(8));
        assert_eq!(
            store.purge_failed(clock.now() - Duration::days(7)).await.unwrap(),
            1
        );
        assert_eq!(store.len().await, 1);
    }
}
