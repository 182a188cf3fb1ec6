//! Job and lock store behaviour against a live PostgreSQL.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -p jobmill-database`.

mod helpers;

use chrono::Duration;

use jobmill_core::types::BackoffPolicy;
use jobmill_database::store::{JobStore, LockStore};
use jobmill_entity::job::{Completion, FailureOutcome, Frequency, JobFilter, JobState, NewJob};

use helpers::TestDb;

fn staleness() -> Duration {
    Duration::seconds(60)
}

#[tokio::test]
async fn test_health_check() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    assert!(db.db.health_check().await.unwrap());
    db.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claimers_get_one_job() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let id = db
        .jobs
        .enqueue(&NewJob::new("mail.send", serde_json::json!({})).queue(db.scope.clone()))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let jobs = db.jobs.clone();
        let queues = db.queues();
        tasks.push(tokio::spawn(async move {
            jobs.claim_next(&queues, staleness()).await.unwrap()
        }));
    }

    let claimed: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].number_attempts, 1);
    assert_eq!(claimed[0].locked_at, Some(helpers::start()));
    db.cleanup().await;
}

#[tokio::test]
async fn test_claims_in_perform_at_order() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let later = db
        .jobs
        .enqueue(&NewJob::new("mail.send", serde_json::json!({})).queue(db.scope.clone()))
        .await
        .unwrap();
    let earlier = db
        .jobs
        .enqueue(
            &NewJob::new("mail.send", serde_json::json!({}))
                .queue(db.scope.clone())
                .perform_at(helpers::start() - Duration::minutes(5)),
        )
        .await
        .unwrap();
    db.jobs
        .enqueue(
            &NewJob::new("mail.send", serde_json::json!({}))
                .queue(db.scope.clone())
                .perform_at(helpers::start() + Duration::minutes(5)),
        )
        .await
        .unwrap();

    let first = db.jobs.claim_next(&db.queues(), staleness()).await.unwrap();
    let second = db.jobs.claim_next(&db.queues(), staleness()).await.unwrap();
    let third = db.jobs.claim_next(&db.queues(), staleness()).await.unwrap();

    assert_eq!(first.map(|job| job.id), Some(earlier));
    assert_eq!(second.map(|job| job.id), Some(later));
    assert!(third.is_none());
    db.cleanup().await;
}

#[tokio::test]
async fn test_stale_claim_is_reclaimed() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let id = db
        .jobs
        .enqueue(&NewJob::new("mail.send", serde_json::json!({})).queue(db.scope.clone()))
        .await
        .unwrap();

    assert!(db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().is_some());

    db.clock.advance(Duration::seconds(60));
    assert!(db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().is_none());

    db.clock.advance(Duration::seconds(1));
    let job = db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.number_attempts, 2);
    assert_eq!(job.locked_at, Some(helpers::start() + Duration::seconds(61)));
    db.cleanup().await;
}

#[tokio::test]
async fn test_failure_becomes_terminal() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let backoff = BackoffPolicy::Fixed(Duration::seconds(10));
    let id = db
        .jobs
        .enqueue(&NewJob::new("feeds.fetch", serde_json::json!({})).queue(db.scope.clone()))
        .await
        .unwrap();

    db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().unwrap();
    let outcome = db.jobs.fail(id, "timed out", 2, &backoff).await.unwrap();
    assert_eq!(
        outcome,
        FailureOutcome::Retrying {
            perform_at: helpers::start() + Duration::seconds(10),
            attempts: 1,
        }
    );
    assert!(db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().is_none());

    db.clock.advance(Duration::seconds(10));
    db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().unwrap();
    let outcome = db.jobs.fail(id, "timed out again", 2, &backoff).await.unwrap();
    assert!(matches!(outcome, FailureOutcome::Failed { attempts: 2, .. }));

    db.clock.advance(Duration::days(1));
    assert!(db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().is_none());

    let job = db.jobs.find(id).await.unwrap().unwrap();
    assert!(job.is_failed());
    assert_eq!(job.last_error, "timed out again");

    let failed = db
        .jobs
        .list(&JobFilter {
            state: JobState::Failed,
            queue: Some(db.scope.clone()),
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(failed.iter().map(|job| job.id).collect::<Vec<_>>(), vec![id]);

    assert!(db.jobs.requeue(id).await.unwrap());
    let job = db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.number_attempts, 1);
    db.cleanup().await;
}

#[tokio::test]
async fn test_completion_deletes_or_rearms() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let every: Frequency = "every 15 seconds".parse().unwrap();
    let recurring = db
        .jobs
        .enqueue(
            &NewJob::new("feeds.sync", serde_json::json!({}))
                .queue(db.scope.clone())
                .frequency(every),
        )
        .await
        .unwrap();
    let one_shot = db
        .jobs
        .enqueue(&NewJob::new("mail.send", serde_json::json!({})).queue(db.scope.clone()))
        .await
        .unwrap();

    db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().unwrap();
    db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().unwrap();

    db.clock.advance(Duration::seconds(3));
    let next = helpers::start() + Duration::seconds(15);
    assert_eq!(
        db.jobs.complete(recurring).await.unwrap(),
        Completion::Rearmed { perform_at: next }
    );
    assert_eq!(db.jobs.complete(one_shot).await.unwrap(), Completion::Deleted);
    assert!(db.jobs.find(one_shot).await.unwrap().is_none());

    let job = db.jobs.find(recurring).await.unwrap().unwrap();
    assert_eq!(job.perform_at, next);
    assert!(job.locked_at.is_none());
    assert_eq!(job.number_attempts, 0);
    assert!(db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().is_none());

    db.clock.advance(Duration::seconds(12));
    let job = db.jobs.claim_next(&db.queues(), staleness()).await.unwrap().unwrap();
    assert_eq!(job.id, recurring);
    db.cleanup().await;
}

#[tokio::test]
async fn test_lock_lease_lifecycle() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let key = db.key("feed:42");
    let ttl = Duration::seconds(5);

    assert!(db.locks.acquire(&key, ttl).await.unwrap());
    assert!(!db.locks.acquire(&key, ttl).await.unwrap());

    // Renewal pushes expiry to now + 10s.
    assert!(db.locks.renew(&key, Duration::seconds(10)).await.unwrap());
    db.clock.advance(Duration::seconds(9));
    assert!(!db.locks.acquire(&key, ttl).await.unwrap());

    db.clock.advance(Duration::seconds(1));
    assert!(!db.locks.renew(&key, ttl).await.unwrap());
    assert!(db.locks.acquire(&key, ttl).await.unwrap());

    db.locks.release(&key).await.unwrap();
    assert!(!db.locks.renew(&key, ttl).await.unwrap());
    assert!(db.locks.acquire(&key, ttl).await.unwrap());
    db.cleanup().await;
}
