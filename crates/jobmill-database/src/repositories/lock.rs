//! PostgreSQL lock store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;
use tracing::debug;

use jobmill_core::clock::Clock;
use jobmill_core::error::AppError;
use jobmill_core::result::AppResult;
use jobmill_entity::lock::Lock;

use crate::store::{LockStore, validate_lease};

/// Repository for named leases, backed by the `locks` table.
#[derive(Debug, Clone)]
pub struct LockRepository {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl LockRepository {
    /// Create a new lock repository.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl LockStore for LockRepository {
    async fn acquire(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        validate_lease(key, ttl)?;
        let lease = Lock::lease(key, self.clock.now(), ttl);

        // The conflict branch only fires on an expired row, so a live lease
        // makes the statement return nothing.
        let acquired = sqlx::query_scalar::<_, String>(
            "INSERT INTO locks (key, created_at, expired_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE \
             SET created_at = EXCLUDED.created_at, expired_at = EXCLUDED.expired_at \
             WHERE locks.expired_at <= EXCLUDED.created_at \
             RETURNING key",
        )
        .bind(&lease.key)
        .bind(lease.created_at)
        .bind(lease.expired_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from_sqlx(format!("Failed to acquire lock '{key}'"), e))?
        .is_some();

        debug!(lock.key = key, acquired, "Lock acquire attempt");
        Ok(acquired)
    }

    async fn release(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM locks WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(format!("Failed to release lock '{key}'"), e))?;
        Ok(())
    }

    async fn renew(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        validate_lease(key, ttl)?;
        let now = self.clock.now();

        let result = sqlx::query("UPDATE locks SET expired_at = $3 WHERE key = $1 AND expired_at > $2")
            .bind(key)
            .bind(now)
            .bind(now + ttl)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx(format!("Failed to renew lock '{key}'"), e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> AppResult<Vec<Lock>> {
        sqlx::query_as::<_, Lock>("SELECT * FROM locks WHERE expired_at > $1 ORDER BY key")
            .bind(self.clock.now())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to list locks", e))
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM locks WHERE expired_at <= $1")
            .bind(self.clock.now())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::from_sqlx("Failed to purge expired locks", e))?;
        Ok(result.rows_affected())
    }
}
