//! Integration tests for the PostgreSQL job queue.
//!
//! These need a reachable PostgreSQL (`DATABASE_URL`); `sqlx::test` creates
//! a fresh database per test and applies the crate's migrations.
//! Run with `cargo test -p melodia-db -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use melodia_core::error::CoreError;
use melodia_core::job::{JobListQuery, JobStatus, Outcome, SubmitJob};
use melodia_core::queue::JobQueue;
use melodia_db::PgJobQueue;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prompt(text: &str) -> SubmitJob {
    SubmitJob::from_value(serde_json::json!({ "prompt": text })).unwrap()
}

const LEASE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn submit_claim_complete(pool: PgPool) {
    let queue = PgJobQueue::new(pool);
    let id = queue.submit(prompt("calm piano")).await.unwrap();
    assert_eq!(queue.status(id).await.unwrap().status, JobStatus::Pending);

    let claimed = queue.claim("w-1", LEASE).await.unwrap().unwrap();
    assert_eq!(claimed.job.id, id);
    assert_eq!(claimed.lease.attempt, 1);
    assert_eq!(queue.status(id).await.unwrap().status, JobStatus::Running);

    let outcome = Outcome::succeeded("outputs/abc.wav");
    queue.complete(&claimed.lease, outcome.clone()).await.unwrap();
    // Idempotent repeat.
    queue.complete(&claimed.lease, outcome).await.unwrap();

    let job = queue.status(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.result_ref.as_deref(), Some("outputs/abc.wav"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_claims_do_not_double_assign(pool: PgPool) {
    let queue = Arc::new(PgJobQueue::new(pool));
    queue.submit(prompt("only one")).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim(&format!("w-{i}"), LEASE).await })
        })
        .collect();

    let winners = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(Some(_)))))
        .count();
    assert_eq!(winners, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn expired_lease_is_reclaimed_and_zombie_is_stale(pool: PgPool) {
    let queue = PgJobQueue::new(pool);
    let id = queue.submit(prompt("x")).await.unwrap();

    let zombie = queue
        .claim("w-a", Duration::from_millis(100))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(queue.status(id).await.unwrap().status, JobStatus::Pending);

    let rescued = queue.claim("w-b", LEASE).await.unwrap().unwrap();
    assert_eq!(rescued.lease.attempt, 2);
    queue
        .complete(&rescued.lease, Outcome::succeeded("outputs/b.wav"))
        .await
        .unwrap();

    assert_matches!(
        queue.complete(&zombie.lease, Outcome::succeeded("outputs/a.wav")).await,
        Err(CoreError::StaleLease { .. })
    );
    assert_matches!(
        queue.renew(&zombie.lease, LEASE).await,
        Err(CoreError::StaleLease { .. })
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn cancel_and_retry(pool: PgPool) {
    let queue = PgJobQueue::new(pool);
    let id = queue.submit(prompt("x")).await.unwrap();

    assert_matches!(queue.retry(id).await, Err(CoreError::Validation(_)));
    assert!(queue.cancel(id).await.unwrap());
    assert!(!queue.cancel(id).await.unwrap());

    let retry_id = queue.retry(id).await.unwrap();
    let retried = queue.status(retry_id).await.unwrap();
    assert_eq!(retried.retry_of, Some(id));

    let pending = queue
        .list(&JobListQuery {
            status: Some(JobStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, retry_id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failed_completion_requires_summary(pool: PgPool) {
    let queue = PgJobQueue::new(pool);
    queue.submit(prompt("x")).await.unwrap();
    let claimed = queue.claim("w-1", LEASE).await.unwrap().unwrap();

    assert_matches!(
        queue.complete(&claimed.lease, Outcome::failed("")).await,
        Err(CoreError::Validation(_))
    );
    queue
        .complete(&claimed.lease, Outcome::failed("model crashed"))
        .await
        .unwrap();
    let job = queue.status(claimed.job.id).await.unwrap();
    assert_eq!(job.error_message.as_deref(), Some("model crashed"));
}
