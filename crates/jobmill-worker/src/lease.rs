//! Running work under a named lease.

use std::future::Future;

use chrono::Duration;
use tracing;

use jobmill_core::result::AppResult;
use jobmill_database::store::LockStore;

/// Run `work` while holding the lease on `key`.
///
/// Returns `Ok(None)` without running anything when another holder has a
/// live lease: the resource is already being taken care of. The lease is
/// released once `work` finishes, whatever it returned. An unreachable
/// store is an error and `work` does not run.
pub async fn with_lease<F, Fut, T>(
    locks: &dyn LockStore,
    key: &str,
    ttl: Duration,
    work: F,
) -> AppResult<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if !locks.acquire(key, ttl).await? {
        tracing::debug!(lock.key = key, "Lease held elsewhere, skipping");
        return Ok(None);
    }

    let output = work().await;

    if let Err(e) = locks.release(key).await {
        // The lease still expires on its own.
        tracing::warn!(lock.key = key, "Failed to release lease: {}", e);
    }
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use jobmill_core::clock::ManualClock;
    use jobmill_database::MemoryLockStore;

    #[tokio::test]
    async fn test_skips_when_held_and_releases_after() {
        let locks = MemoryLockStore::new(Arc::new(ManualClock::new(Utc::now())));
        let ttl = Duration::seconds(30);

        assert!(locks.acquire("host:example.com", ttl).await.unwrap());
        let skipped = with_lease(&locks, "host:example.com", ttl, || async { 1 })
            .await
            .unwrap();
        assert_eq!(skipped, None);

        locks.release("host:example.com").await.unwrap();
        let ran = with_lease(&locks, "host:example.com", ttl, || async { 2 })
            .await
            .unwrap();
        assert_eq!(ran, Some(2));
        assert!(locks.is_empty());
    }
}
