//! Lease renewal for a running job.
//!
//! A [`Heartbeat`] renews the lease on a fixed interval until stopped. Each
//! renewal is bounded by the renew timeout and never outlives the current
//! lease. The `lost` token fires when the lease is gone: the queue reports it
//! stale or missing, or renewals kept failing until the local lease deadline
//! passed. Either way another worker may now hold the job.

use std::sync::Arc;
use std::time::Duration;

use melodia_core::error::CoreError;
use melodia_core::job::WorkerLease;
use melodia_core::queue::JobQueue;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// Timing knobs copied out of [`WorkerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatTiming {
    pub lease_duration: Duration,
    pub interval: Duration,
    pub renew_timeout: Duration,
}

impl From<&WorkerConfig> for HeartbeatTiming {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            lease_duration: config.lease_duration,
            interval: config.heartbeat_interval,
            renew_timeout: config.renew_timeout,
        }
    }
}

pub struct Heartbeat {
    handle: JoinHandle<()>,
    stop: CancellationToken,
    lost: CancellationToken,
}

impl Heartbeat {
    /// Start renewing `lease`, which was requested at `granted_at`.
    ///
    /// `granted_at` is taken before the claim was sent, so the local deadline
    /// never lands after the queue's.
    pub fn spawn(
        queue: Arc<dyn JobQueue>,
        lease: WorkerLease,
        granted_at: Instant,
        timing: HeartbeatTiming,
    ) -> Self {
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();
        let handle = tokio::spawn(run(
            queue,
            lease,
            granted_at,
            timing,
            stop.clone(),
            lost.clone(),
        ));
        Self { handle, stop, lost }
    }

    /// Fires when the lease can no longer be renewed.
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Stop renewing and wait for the task to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Heartbeat task panicked");
        }
    }
}

async fn run(
    queue: Arc<dyn JobQueue>,
    mut lease: WorkerLease,
    granted_at: Instant,
    timing: HeartbeatTiming,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let mut deadline = granted_at + timing.lease_duration;

    loop {
        let wake = (Instant::now() + timing.interval).min(deadline);
        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep_until(wake) => {}
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            give_up(&lease, &lost, "Lease deadline passed without a successful renewal");
            break;
        }

        let sent_at = Instant::now();
        let renewal = tokio::select! {
            () = stop.cancelled() => break,
            result = tokio::time::timeout(
                timing.renew_timeout.min(remaining),
                queue.renew(&lease, timing.lease_duration),
            ) => result,
        };

        match renewal {
            Ok(Ok(renewed)) => {
                tracing::trace!(
                    job_id = %renewed.job_id,
                    expires_at = %renewed.expires_at,
                    "Lease renewed",
                );
                lease = renewed;
                deadline = sent_at + timing.lease_duration;
            }
            Ok(Err(CoreError::StaleLease { .. } | CoreError::NotFound { .. })) => {
                give_up(&lease, &lost, "Lease lost, abandoning execution");
                break;
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    job_id = %lease.job_id,
                    error = %e,
                    "Lease renewal failed, will retry",
                );
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %lease.job_id,
                    timeout_ms = timing.renew_timeout.as_millis() as u64,
                    "Lease renewal timed out, will retry",
                );
            }
        }

        if Instant::now() >= deadline {
            give_up(&lease, &lost, "Lease deadline passed without a successful renewal");
            break;
        }
    }
}

fn give_up(lease: &WorkerLease, lost: &CancellationToken, reason: &'static str) {
    tracing::warn!(
        job_id = %lease.job_id,
        worker_id = %lease.worker_id,
        attempt = lease.attempt,
        "{reason}",
    );
    lost.cancel();
}
