//! Periodic recovery of jobs whose worker stopped renewing its lease.
//!
//! Claims already pick up expired leases, so this only makes the recovery
//! visible sooner in job listings.

use std::sync::Arc;
use std::time::Duration;

use melodia_core::queue::JobQueue;
use tokio_util::sync::CancellationToken;

/// Run the reaper loop until `cancel` is triggered.
pub async fn run(queue: Arc<dyn JobQueue>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Lease reaper started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Lease reaper stopping");
                break;
            }
            _ = ticker.tick() => {
                match queue.reap_expired().await {
                    Ok(0) => tracing::trace!("Lease reaper: nothing expired"),
                    Ok(reverted) => tracing::info!(reverted, "Lease reaper: expired jobs returned to pending"),
                    Err(e) => tracing::error!(error = %e, "Lease reaper: sweep failed"),
                }
            }
        }
    }
}
