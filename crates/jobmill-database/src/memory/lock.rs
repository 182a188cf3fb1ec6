//! In-memory lock store built on `dashmap`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use jobmill_core::clock::Clock;
use jobmill_core::result::AppResult;
use jobmill_entity::lock::Lock;

use crate::store::{LockStore, validate_lease};

/// Lock store holding leases in a concurrent map.
#[derive(Debug, Clone)]
pub struct MemoryLockStore {
    locks: Arc<DashMap<String, Lock>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLockStore {
    /// Create an empty lock store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of rows, expired or not.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the store holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        validate_lease(key, ttl)?;
        let now = self.clock.now();

        let acquired = match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now) {
                    entry.insert(Lock::lease(key, now, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Lock::lease(key, now, ttl));
                true
            }
        };
        Ok(acquired)
    }

    async fn release(&self, key: &str) -> AppResult<()> {
        self.locks.remove(key);
        Ok(())
    }

    async fn renew(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        validate_lease(key, ttl)?;
        let now = self.clock.now();

        match self.locks.get_mut(key) {
            Some(mut lock) if !lock.is_expired(now) => {
                lock.expired_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self) -> AppResult<Vec<Lock>> {
        let now = self.clock.now();
        let mut live: Vec<Lock> = self
            .locks
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect();
        live.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(live)
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let before = self.locks.len();
        self.locks.retain(|_, lock| !lock.is_expired(now));
        Ok((before - self.locks.len()) as u64)
    }
}
