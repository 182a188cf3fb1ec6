//! Shared helpers for tests against a live PostgreSQL.
//!
//! Tests connect to `DATABASE_URL` and are skipped when it is unset.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobmill_core::clock::ManualClock;
use jobmill_core::config::DatabaseConfig;
use jobmill_database::{DatabasePool, JobRepository, LockRepository, migration};

/// Repositories over a migrated database, sharing one manual clock.
pub struct TestDb {
    pub db: DatabasePool,
    pub clock: Arc<ManualClock>,
    pub jobs: Arc<JobRepository>,
    pub locks: Arc<LockRepository>,
    /// Queue and lock-key prefix owned by this test
    pub scope: String,
}

impl TestDb {
    /// Connect and migrate, or `None` when no database is configured.
    pub async fn connect() -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping PostgreSQL test");
            return None;
        };

        let config = DatabaseConfig {
            url,
            max_connections: 20,
            min_connections: 1,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 60,
        };
        let db = DatabasePool::connect(&config)
            .await
            .expect("Failed to connect to test database");
        migration::run_migrations(db.pool())
            .await
            .expect("Failed to run migrations");

        let clock = Arc::new(ManualClock::new(start()));
        let jobs = Arc::new(JobRepository::new(db.pool().clone(), clock.clone()));
        let locks = Arc::new(LockRepository::new(db.pool().clone(), clock.clone()));

        Some(Self {
            db,
            clock,
            jobs,
            locks,
            scope: format!("test-{}", Uuid::new_v4().simple()),
        })
    }

    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    /// The queue list that only sees this test's jobs.
    pub fn queues(&self) -> Vec<String> {
        vec![self.scope.clone()]
    }

    /// A lock key unique to this test.
    pub fn key(&self, name: &str) -> String {
        format!("{}:{name}", self.scope)
    }

    /// Remove every row this test created.
    pub async fn cleanup(self) {
        sqlx::query("DELETE FROM jobs WHERE queue = $1")
            .bind(&self.scope)
            .execute(self.db.pool())
            .await
            .expect("Failed to clean jobs");
        sqlx::query("DELETE FROM locks WHERE key LIKE $1")
            .bind(format!("{}:%", self.scope))
            .execute(self.db.pool())
            .await
            .expect("Failed to clean locks");
        self.db.close().await;
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}
