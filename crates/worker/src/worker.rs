//! A single worker: claim, execute, settle, repeat.
//!
//! While a job executes, a [`Heartbeat`] keeps its lease alive. Losing the
//! lease aborts the execution and discards whatever it produced; the job
//! belongs to whoever holds the new lease. Shutdown mid-job releases the
//! lease so another worker can start over immediately.

use std::sync::Arc;

use melodia_core::artifact::{output_artifact_name, ArtifactStore};
use melodia_core::backoff::Backoff;
use melodia_core::error::CoreError;
use melodia_core::generation::GenerationCapability;
use melodia_core::job::{Job, JobStatus, Outcome, WorkerLease};
use melodia_core::queue::{ClaimedJob, JobQueue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::heartbeat::{Heartbeat, HeartbeatTiming};
use crate::resolver::{required_artifacts, ArtifactResolver};

/// Why an execution stopped before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    LeaseLost,
    Shutdown,
}

/// What happened to a claimed job, as seen by this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Succeeded { result_ref: String },
    Failed { error: String },
    /// Handed back to the queue for another attempt.
    Released,
    /// The lease was lost or the job cancelled; nothing was recorded.
    Discarded,
}

pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ArtifactStore>,
    generator: Arc<dyn GenerationCapability>,
    resolver: Arc<ArtifactResolver>,
    config: Arc<WorkerConfig>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ArtifactStore>,
        generator: Arc<dyn GenerationCapability>,
        resolver: Arc<ArtifactResolver>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            store,
            generator,
            resolver,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the claim loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut idle = Backoff::new(self.config.idle_backoff.clone());
        tracing::info!(worker_id = %self.id, "Worker started");

        while !shutdown.is_cancelled() {
            let delay = match self.poll_once(&shutdown).await {
                Ok(Some(_)) => {
                    idle.reset();
                    continue;
                }
                Ok(None) => idle.next_delay(),
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Claim failed");
                    idle.next_delay()
                }
            };

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    /// Claim and execute at most one job.
    ///
    /// Returns `None` if nothing was claimable.
    pub async fn poll_once(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Settlement>, CoreError> {
        let requested_at = Instant::now();
        match self.queue.claim(&self.id, self.config.lease_duration).await? {
            Some(claimed) => Ok(Some(self.execute(claimed, requested_at, shutdown).await)),
            None => Ok(None),
        }
    }

    async fn execute(
        &self,
        claimed: ClaimedJob,
        requested_at: Instant,
        shutdown: &CancellationToken,
    ) -> Settlement {
        let ClaimedJob { job, lease } = claimed;
        tracing::info!(
            job_id = %job.id,
            worker_id = %self.id,
            attempt = lease.attempt,
            "Job claimed",
        );

        let heartbeat = Heartbeat::spawn(
            Arc::clone(&self.queue),
            lease.clone(),
            requested_at,
            HeartbeatTiming::from(self.config.as_ref()),
        );
        let lost = heartbeat.lost();

        let result = tokio::select! {
            result = self.run_job(&job, &lease) => Ok(result),
            () = lost.cancelled() => Err(Interruption::LeaseLost),
            () = shutdown.cancelled() => Err(Interruption::Shutdown),
        };
        heartbeat.stop().await;

        match result {
            Ok(Ok(result_ref)) => self.finish(&lease, Outcome::succeeded(result_ref)).await,
            Ok(Err(e)) => self.settle_error(&lease, e).await,
            Err(Interruption::LeaseLost) => {
                tracing::debug!(job_id = %lease.job_id, "Lease lost during execution, discarding");
                Settlement::Discarded
            }
            Err(Interruption::Shutdown) => {
                tracing::info!(job_id = %lease.job_id, "Shutting down mid-job, releasing");
                self.release(&lease).await
            }
        }
    }

    /// Resolve artifacts, generate, publish. Returns the result reference.
    async fn run_job(&self, job: &Job, lease: &WorkerLease) -> Result<String, CoreError> {
        let names = required_artifacts(&self.config.model_artifacts, &job.params)?;
        let artifacts = self.resolver.resolve_all(&names).await?;

        self.ensure_still_held(lease).await?;
        let audio = self.generator.generate(&job.params, &artifacts).await?;
        if audio.is_empty() {
            return Err(CoreError::GenerationFailure(
                "Generator returned no audio".to_string(),
            ));
        }
        self.ensure_still_held(lease).await?;

        let name = output_artifact_name(&audio, &self.config.output_extension);
        let artifact = self.store.put(&name, &audio).await?;
        tracing::info!(
            job_id = %job.id,
            result_ref = %artifact.name,
            size_bytes = artifact.size_bytes,
            "Output published",
        );
        Ok(artifact.name)
    }

    /// Stop early if the job was cancelled or re-leased while we worked.
    async fn ensure_still_held(&self, lease: &WorkerLease) -> Result<(), CoreError> {
        let job = self.queue.status(lease.job_id).await?;
        if job.holds(lease) {
            Ok(())
        } else if job.status == JobStatus::Cancelled {
            Err(CoreError::Cancelled { job_id: job.id })
        } else {
            Err(CoreError::StaleLease {
                job_id: lease.job_id,
                attempt: lease.attempt,
            })
        }
    }

    async fn settle_error(&self, lease: &WorkerLease, error: CoreError) -> Settlement {
        match error {
            CoreError::StaleLease { .. } => {
                tracing::debug!(job_id = %lease.job_id, "Lease no longer current, discarding result");
                Settlement::Discarded
            }
            CoreError::Cancelled { .. } => {
                tracing::info!(job_id = %lease.job_id, "Job cancelled during execution, discarding");
                Settlement::Discarded
            }
            e if e.is_transient() && lease.attempt < self.config.max_attempts => {
                tracing::warn!(
                    job_id = %lease.job_id,
                    attempt = lease.attempt,
                    error = %e,
                    "Transient failure, releasing job",
                );
                self.release(lease).await
            }
            e if e.is_transient() => {
                let summary = format!("Giving up after {} attempts: {e}", lease.attempt);
                self.finish(lease, Outcome::failed(summary)).await
            }
            e => self.finish(lease, Outcome::failed(e.to_string())).await,
        }
    }

    async fn finish(&self, lease: &WorkerLease, outcome: Outcome) -> Settlement {
        let settlement = match &outcome {
            Outcome::Succeeded { result_ref } => Settlement::Succeeded {
                result_ref: result_ref.clone(),
            },
            Outcome::Failed { error } => Settlement::Failed {
                error: error.clone(),
            },
        };

        match self.queue.complete(lease, outcome).await {
            Ok(()) => {
                match &settlement {
                    Settlement::Failed { error } => tracing::warn!(
                        job_id = %lease.job_id,
                        attempt = lease.attempt,
                        error = %error,
                        "Job failed",
                    ),
                    _ => tracing::info!(job_id = %lease.job_id, attempt = lease.attempt, "Job succeeded"),
                }
                settlement
            }
            Err(CoreError::StaleLease { .. }) => {
                tracing::debug!(job_id = %lease.job_id, "Completion rejected, lease is stale");
                Settlement::Discarded
            }
            Err(e) => {
                // The lease will expire and the job will be claimed again.
                tracing::error!(job_id = %lease.job_id, error = %e, "Failed to record outcome");
                Settlement::Discarded
            }
        }
    }

    async fn release(&self, lease: &WorkerLease) -> Settlement {
        match self.queue.release(lease).await {
            Ok(()) => Settlement::Released,
            Err(CoreError::StaleLease { .. }) => Settlement::Discarded,
            Err(e) => {
                tracing::error!(job_id = %lease.job_id, error = %e, "Failed to release job");
                Settlement::Discarded
            }
        }
    }
}
