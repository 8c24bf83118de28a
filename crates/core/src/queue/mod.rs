//! The job queue seam.
//!
//! [`JobQueue`] is the only contended resource in the system. Every state
//! change is a conditional update keyed on the job's current status and
//! lease generation, so concurrent workers can never both hold a job.

mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::job::{Job, JobListQuery, JobStatus, Outcome, SubmitJob, WorkerLease};
use crate::types::JobId;

pub use memory::MemoryJobQueue;

/// A job handed to a worker together with the lease that guards it.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub lease: WorkerLease,
}

/// Durable queue of generation requests with at-most-one active execution
/// per job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a new pending job and return its id.
    async fn submit(&self, input: SubmitJob) -> Result<JobId, CoreError>;

    /// Atomically take the next pending job (or a running job whose lease
    /// expired) and start a new lease on it for `worker_id`.
    async fn claim(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<ClaimedJob>, CoreError>;

    /// Extend a live lease. Fails with [`CoreError::StaleLease`] once the
    /// lease has expired or been superseded.
    async fn renew(
        &self,
        lease: &WorkerLease,
        lease_duration: Duration,
    ) -> Result<WorkerLease, CoreError>;

    /// Give the job back early so another worker may pick it up.
    async fn release(&self, lease: &WorkerLease) -> Result<(), CoreError>;

    /// Record the outcome of the leased attempt. Repeating the same outcome
    /// for the same lease is a no-op.
    async fn complete(&self, lease: &WorkerLease, outcome: Outcome) -> Result<(), CoreError>;

    /// Current view of a job. An expired running job is reported (and
    /// stored) as pending.
    async fn status(&self, job_id: JobId) -> Result<Job, CoreError>;

    /// Cancel a non-terminal job. Returns `false` if it already finished.
    async fn cancel(&self, job_id: JobId) -> Result<bool, CoreError>;

    /// Resubmit a failed or cancelled job's parameters as a new job.
    async fn retry(&self, job_id: JobId) -> Result<JobId, CoreError>;

    /// List jobs, newest first.
    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, CoreError>;

    /// Revert every expired running job to pending. Returns how many moved.
    async fn reap_expired(&self) -> Result<u64, CoreError>;
}

/// Only failed or cancelled jobs may be retried.
pub fn ensure_retryable(job: &Job) -> Result<(), CoreError> {
    match job.status {
        JobStatus::Failed | JobStatus::Cancelled => Ok(()),
        other => Err(CoreError::Validation(format!(
            "Only failed or cancelled jobs can be retried (job {} is {other})",
            job.id
        ))),
    }
}
