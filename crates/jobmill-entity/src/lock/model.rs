//! Lock entity model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A time-bounded exclusive hold on a named resource.
///
/// A row past `expired_at` is logically free even if it still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Lock {
    /// Identifier of the protected resource, e.g. `"host:example.com"`.
    pub key: String,
    /// When the lease was acquired.
    pub created_at: DateTime<Utc>,
    /// When the lease auto-releases.
    pub expired_at: DateTime<Utc>,
}

impl Lock {
    /// A lease on `key` starting at `now` and lasting `ttl`.
    pub fn lease(key: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            created_at: now,
            expired_at: now + ttl,
        }
    }

    /// Whether the lease no longer protects anything at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at <= now
    }
}
