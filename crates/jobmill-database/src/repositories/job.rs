//! PostgreSQL job store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use jobmill_core::clock::Clock;
use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_core::types::BackoffPolicy;
use jobmill_entity::job::{
    Completion, FailureOutcome, Job, JobFilter, JobId, JobState, JobStats, NewJob,
};

use crate::store::JobStore;

/// Repository for background jobs, backed by the `jobs` table.
///
/// Timestamps are bound from the injected clock rather than `NOW()`.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Lock the row for the rest of `tx`.
    async fn find_for_update(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        id: JobId,
    ) -> AppResult<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to load job", e))?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn enqueue(&self, job: &NewJob) -> AppResult<JobId> {
        job.validate()?;
        let now = self.clock.now();

        sqlx::query_scalar::<_, JobId>(
            "INSERT INTO jobs (name, args, queue, perform_at, frequency, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING id",
        )
        .bind(&job.name)
        .bind(&job.args)
        .bind(&job.queue)
        .bind(job.perform_at.unwrap_or(now))
        .bind(&job.frequency)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to enqueue job", e))
    }

    async fn find(&self, id: JobId) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to find job", e))
    }

    async fn claim_next(&self, queues: &[String], staleness: Duration) -> AppResult<Option<Job>> {
        let now = self.clock.now();

        // SKIP LOCKED moves a losing claimant on to the next candidate.
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET locked_at = $1, number_attempts = number_attempts + 1, updated_at = $1 \
             WHERE id = ( \
                SELECT id FROM jobs \
                WHERE queue = ANY($2) \
                AND failed_at IS NULL \
                AND perform_at <= $1 \
                AND (locked_at IS NULL OR locked_at < $3) \
                ORDER BY perform_at ASC, id ASC \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
             ) RETURNING *",
        )
        .bind(now)
        .bind(queues)
        .bind(now - staleness)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to claim job", e))
    }

    async fn complete(&self, id: JobId) -> AppResult<Completion> {
        let now = self.clock.now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to begin transaction", e))?;

        let job = Self::find_for_update(&mut tx, id).await?;

        let completion = match job.next_perform_at(now)? {
            Some(perform_at) => {
                sqlx::query(
                    "UPDATE jobs SET perform_at = $2, locked_at = NULL, number_attempts = 0, \
                     last_error = '', updated_at = $3 WHERE id = $1",
                )
                .bind(id)
                .bind(perform_at)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::from_sqlx("Failed to re-arm job", e))?;
                Completion::Rearmed { perform_at }
            }
            None => {
                sqlx::query("DELETE FROM jobs WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| AppError::from_sqlx("Failed to delete job", e))?;
                Completion::Deleted
            }
        };

        tx.commit()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to commit completion", e))?;
        Ok(completion)
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        max_attempts: u32,
        backoff: &BackoffPolicy,
    ) -> AppResult<FailureOutcome> {
        let now = self.clock.now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to begin transaction", e))?;

        let job = Self::find_for_update(&mut tx, id).await?;
        let outcome = job.plan_failure(now, max_attempts, backoff);

        let query = match outcome {
            FailureOutcome::Retrying { perform_at, .. } => sqlx::query(
                "UPDATE jobs SET last_error = $2, locked_at = NULL, perform_at = $3, \
                 updated_at = $4 WHERE id = $1",
            )
            .bind(id)
            .bind(error)
            .bind(perform_at)
            .bind(now),
            FailureOutcome::Failed { failed_at, .. } => sqlx::query(
                "UPDATE jobs SET last_error = $2, locked_at = NULL, failed_at = $3, \
                 updated_at = $4 WHERE id = $1",
            )
            .bind(id)
            .bind(error)
            .bind(failed_at)
            .bind(now),
        };

        query
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to record job failure", e))?;
        tx.commit()
            .await
            .map_err(|e| AppError::from_sqlx("Failed to commit failure", e))?;
        Ok(outcome)
    }

    async fn fail_permanently(&self, id: JobId, error: &str) -> AppResult<()> {
        let now = self.clock.now();
        let result = sqlx::query(
            "UPDATE jobs SET last_error = $2, locked_at = NULL, failed_at = $3, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to mark job as failed", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Job {id} not found")));
        }
        Ok(())
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM jobs WHERE ");
        query.push(match filter.state {
            JobState::Pending => "failed_at IS NULL AND locked_at IS NULL",
            JobState::Claimed => "failed_at IS NULL AND locked_at IS NOT NULL",
            JobState::Failed => "failed_at IS NOT NULL",
            JobState::All => "TRUE",
        });
        if let Some(queue) = &filter.queue {
            query.push(" AND queue = ").push_bind(queue.clone());
        }
        query
            .push(" ORDER BY perform_at ASC, id ASC LIMIT ")
            .push_bind(filter.limit);

        query
            .build_query_as::<Job>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to list jobs", e))
    }

    async fn stats(&self) -> AppResult<JobStats> {
        let (pending, claimed, failed) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT \
                COUNT(*) FILTER (WHERE failed_at IS NULL AND locked_at IS NULL), \
                COUNT(*) FILTER (WHERE failed_at IS NULL AND locked_at IS NOT NULL), \
                COUNT(*) FILTER (WHERE failed_at IS NOT NULL) \
             FROM jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to count jobs", e))?;

        Ok(JobStats {
            pending,
            claimed,
            failed,
        })
    }

    async fn requeue(&self, id: JobId) -> AppResult<bool> {
        let now = self.clock.now();
        let result = sqlx::query(
            "UPDATE jobs SET failed_at = NULL, locked_at = NULL, number_attempts = 0, \
             perform_at = $2, updated_at = $2 \
             WHERE id = $1 AND failed_at IS NOT NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to requeue job", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: JobId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to delete job", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_failed(&self, older_than: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE failed_at IS NOT NULL AND failed_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to purge failed jobs", e))?;
        Ok(result.rows_affected())
    }

    async fn has_active(&self, name: &str) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM jobs WHERE name = $1 AND failed_at IS NULL)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx("Failed to look up job", e))
    }
}
