//! Lease semantics of the in-memory job queue under contention and crashes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use melodia_core::error::CoreError;
use melodia_core::job::{JobStatus, Outcome, SubmitJob};
use melodia_core::queue::{JobQueue, MemoryJobQueue};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prompt(text: &str) -> SubmitJob {
    SubmitJob::from_value(serde_json::json!({ "prompt": text })).unwrap()
}

const LONG_LEASE: Duration = Duration::from_secs(30);
const SHORT_LEASE: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Contention
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_a_job() {
    let queue = Arc::new(MemoryJobQueue::new());
    let id = queue.submit(prompt("calm piano")).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim(&format!("w-{i}"), LONG_LEASE).await })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in futures::future::join_all(handles).await {
        if let Some(claimed) = handle.unwrap().unwrap() {
            winners.push(claimed);
        }
    }

    assert_eq!(winners.len(), 1, "exactly one worker must win the claim");
    assert_eq!(winners[0].job.id, id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_completes_exactly_once() {
    let queue = Arc::new(MemoryJobQueue::new());
    let mut submitted = HashSet::new();
    for i in 0..50 {
        submitted.insert(queue.submit(prompt(&format!("track {i}"))).await.unwrap());
    }

    let handles: Vec<_> = (0..8)
        .map(|w| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let worker = format!("w-{w}");
                let mut completed = Vec::new();
                while let Some(claimed) = queue.claim(&worker, LONG_LEASE).await.unwrap() {
                    queue
                        .complete(&claimed.lease, Outcome::succeeded(format!("outputs/{w}")))
                        .await
                        .unwrap();
                    completed.push(claimed.job.id);
                }
                completed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in futures::future::join_all(handles).await {
        for id in handle.unwrap() {
            assert!(seen.insert(id), "job {id} was completed twice");
        }
    }
    assert_eq!(seen, submitted);
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_lease_reverts_to_pending_and_is_reclaimed() {
    let queue = MemoryJobQueue::new();
    let id = queue.submit(prompt("calm piano")).await.unwrap();

    // Worker A claims and then "crashes" (never heartbeats).
    let crashed = queue.claim("w-a", SHORT_LEASE).await.unwrap().unwrap();
    assert_eq!(queue.status(id).await.unwrap().status, JobStatus::Running);

    tokio::time::sleep(SHORT_LEASE * 3).await;
    assert_eq!(queue.status(id).await.unwrap().status, JobStatus::Pending);

    // Worker B picks it up and finishes.
    let rescued = queue.claim("w-b", LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(rescued.job.id, id);
    assert_eq!(rescued.lease.attempt, 2);
    queue
        .complete(&rescued.lease, Outcome::succeeded("outputs/b.wav"))
        .await
        .unwrap();

    // The zombie's late completion is rejected and changes nothing.
    assert_matches!(
        queue
            .complete(&crashed.lease, Outcome::succeeded("outputs/a.wav"))
            .await,
        Err(CoreError::StaleLease { .. })
    );
    let job = queue.status(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.result_ref.as_deref(), Some("outputs/b.wav"));
}

#[tokio::test]
async fn expired_lease_is_claimable_without_status_poll() {
    let queue = MemoryJobQueue::new();
    let id = queue.submit(prompt("x")).await.unwrap();
    queue.claim("w-a", SHORT_LEASE).await.unwrap().unwrap();

    assert!(queue.claim("w-b", LONG_LEASE).await.unwrap().is_none());
    tokio::time::sleep(SHORT_LEASE * 3).await;

    let claimed = queue.claim("w-b", LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(claimed.job.id, id);
}

#[tokio::test]
async fn heartbeat_keeps_lease_alive() {
    let queue = MemoryJobQueue::new();
    queue.submit(prompt("x")).await.unwrap();
    let lease_duration = Duration::from_millis(200);
    let mut lease = queue.claim("w-a", lease_duration).await.unwrap().unwrap().lease;

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        lease = queue.renew(&lease, lease_duration).await.unwrap();
    }

    assert!(queue.claim("w-b", LONG_LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn renew_after_expiry_is_stale() {
    let queue = MemoryJobQueue::new();
    queue.submit(prompt("x")).await.unwrap();
    let lease = queue.claim("w-a", SHORT_LEASE).await.unwrap().unwrap().lease;

    tokio::time::sleep(SHORT_LEASE * 3).await;
    assert_matches!(
        queue.renew(&lease, SHORT_LEASE).await,
        Err(CoreError::StaleLease { .. })
    );
}

#[tokio::test]
async fn reap_expired_moves_only_expired_jobs() {
    let queue = MemoryJobQueue::new();
    queue.submit(prompt("a")).await.unwrap();
    queue.submit(prompt("b")).await.unwrap();
    queue.claim("w-a", SHORT_LEASE).await.unwrap().unwrap();
    queue.claim("w-b", LONG_LEASE).await.unwrap().unwrap();

    tokio::time::sleep(SHORT_LEASE * 3).await;
    assert_eq!(queue.reap_expired().await.unwrap(), 1);
    assert_eq!(queue.reap_expired().await.unwrap(), 0);
}
