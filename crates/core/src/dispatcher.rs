//! Client side of the execution boundary.
//!
//! [`Dispatcher`] turns submit + poll into a synchronous-looking call while
//! keeping the asynchronous boundary explicit: a wait that times out leaves
//! the job running, and the caller can keep polling it by id.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactStore;
use crate::backoff::{Backoff, BackoffConfig};
use crate::error::CoreError;
use crate::job::{Job, JobStatus, SubmitJob};
use crate::queue::JobQueue;
use crate::types::{JobId, JobParams};

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Status polling schedule.
    pub poll: BackoffConfig,
}

/// A successfully completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: JobId,
    pub result_ref: String,
}

pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ArtifactStore>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ArtifactStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            store,
            config,
        }
    }

    pub async fn submit(&self, params: JobParams) -> Result<JobId, CoreError> {
        self.submit_job(SubmitJob::new(params)).await
    }

    pub async fn submit_job(&self, input: SubmitJob) -> Result<JobId, CoreError> {
        let job_id = self.queue.submit(input).await?;
        tracing::info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    pub async fn status(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.queue.status(job_id).await
    }

    /// Submit and block until the job finishes or `timeout` elapses.
    pub async fn submit_and_wait(
        &self,
        params: JobParams,
        timeout: Duration,
    ) -> Result<JobResult, CoreError> {
        let job_id = self.submit(params).await?;
        self.wait_inner(job_id, timeout, None).await
    }

    /// Like [`submit_and_wait`](Self::submit_and_wait), but firing `cancel`
    /// cancels the job in the queue and returns [`CoreError::Cancelled`].
    pub async fn submit_and_wait_cancellable(
        &self,
        params: JobParams,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<JobResult, CoreError> {
        let job_id = self.submit(params).await?;
        self.wait_inner(job_id, timeout, Some(cancel)).await
    }

    /// Wait for an already submitted job.
    pub async fn wait(&self, job_id: JobId, timeout: Duration) -> Result<JobResult, CoreError> {
        self.wait_inner(job_id, timeout, None).await
    }

    /// Read the bytes behind a result reference.
    pub async fn fetch_result(&self, result_ref: &str) -> Result<Vec<u8>, CoreError> {
        self.store.get(result_ref).await
    }

    /// Resubmit a failed job as a new job. This is the only retry path.
    pub async fn retry(&self, job_id: JobId) -> Result<JobId, CoreError> {
        let new_id = self.queue.retry(job_id).await?;
        tracing::info!(original_job_id = %job_id, new_job_id = %new_id, "Job retried");
        Ok(new_id)
    }

    async fn wait_inner(
        &self,
        job_id: JobId,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<JobResult, CoreError> {
        // A timeout too large to represent means waiting without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = Backoff::new(self.config.poll.clone());

        loop {
            let job = self.queue.status(job_id).await?;
            if let Some(result) = terminal_result(&job) {
                return result;
            }

            let mut delay = backoff.next_delay();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    tracing::debug!(job_id = %job_id, status = %job.status, "Wait timed out");
                    return Err(CoreError::WaitTimeout {
                        job_id,
                        waited: timeout,
                    });
                }
                delay = delay.min(deadline - now);
            }

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            let cancelled = self.queue.cancel(job_id).await?;
                            tracing::info!(job_id = %job_id, cancelled, "Wait cancelled by caller");
                            if !cancelled {
                                // Finished in the meantime; report what actually happened.
                                let job = self.queue.status(job_id).await?;
                                if let Some(result) = terminal_result(&job) {
                                    return result;
                                }
                            }
                            return Err(CoreError::Cancelled { job_id });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Map a terminal job to the caller-facing result; `None` while in flight.
pub fn terminal_result(job: &Job) -> Option<Result<JobResult, CoreError>> {
    match job.status {
        JobStatus::Pending | JobStatus::Running => None,
        JobStatus::Succeeded => Some(match &job.result_ref {
            Some(result_ref) => Ok(JobResult {
                job_id: job.id,
                result_ref: result_ref.clone(),
            }),
            None => Err(CoreError::Internal(format!(
                "Job {} succeeded without a result reference",
                job.id
            ))),
        }),
        JobStatus::Failed => Some(Err(CoreError::GenerationFailure(
            job.error_message
                .clone()
                .unwrap_or_else(|| "job failed without an error summary".to_string()),
        ))),
        JobStatus::Cancelled => Some(Err(CoreError::Cancelled { job_id: job.id })),
    }
}
