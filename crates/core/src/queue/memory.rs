//! In-process [`JobQueue`] backed by a mutex-guarded map.
//!
//! Every operation runs under one lock, which makes each transition an
//! atomic compare-and-set. Suitable for single-process deployments and
//! tests; state is lost on restart.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{ensure_retryable, ClaimedJob, JobQueue};
use crate::error::CoreError;
use crate::job::{
    lease_expiry, truncate_summary, validate_lease_duration, Job, JobListQuery, JobStatus,
    Outcome, SubmitJob, WorkerLease,
};
use crate::types::{new_job_id, JobId, Timestamp};

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

fn revert_to_pending(job: &mut Job, now: Timestamp) {
    job.status = JobStatus::Pending;
    job.worker_id = None;
    job.lease_expires_at = None;
    job.updated_at = now;
}

fn stale(lease: &WorkerLease) -> CoreError {
    CoreError::StaleLease {
        job_id: lease.job_id,
        attempt: lease.attempt,
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn submit(&self, input: SubmitJob) -> Result<JobId, CoreError> {
        let id = new_job_id();
        let job = Job::new(id, &input, None, Utc::now());
        self.jobs.lock().await.insert(id, job);
        tracing::debug!(job_id = %id, "Job submitted");
        Ok(id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<ClaimedJob>, CoreError> {
        validate_lease_duration(lease_duration)?;
        let now = Utc::now();
        let expires_at = lease_expiry(now, lease_duration)?;

        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending || job.has_expired_lease(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|job| job.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.attempt += 1;
        job.worker_id = Some(worker_id.to_string());
        job.lease_expires_at = Some(expires_at);
        job.updated_at = now;

        let lease = WorkerLease {
            job_id,
            worker_id: worker_id.to_string(),
            attempt: job.attempt,
            expires_at,
        };
        Ok(Some(ClaimedJob {
            job: job.clone(),
            lease,
        }))
    }

    async fn renew(
        &self,
        lease: &WorkerLease,
        lease_duration: Duration,
    ) -> Result<WorkerLease, CoreError> {
        validate_lease_duration(lease_duration)?;
        let now = Utc::now();
        let expires_at = lease_expiry(now, lease_duration)?;

        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&lease.job_id)
            .ok_or_else(|| CoreError::job_not_found(lease.job_id))?;

        if !job.holds(lease) || job.has_expired_lease(now) {
            return Err(stale(lease));
        }

        job.lease_expires_at = Some(expires_at);
        job.updated_at = now;
        Ok(WorkerLease {
            expires_at,
            ..lease.clone()
        })
    }

    async fn release(&self, lease: &WorkerLease) -> Result<(), CoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&lease.job_id)
            .ok_or_else(|| CoreError::job_not_found(lease.job_id))?;

        if !job.holds(lease) {
            return Err(stale(lease));
        }
        revert_to_pending(job, Utc::now());
        Ok(())
    }

    async fn complete(&self, lease: &WorkerLease, outcome: Outcome) -> Result<(), CoreError> {
        outcome.validate()?;
        let now = Utc::now();

        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&lease.job_id)
            .ok_or_else(|| CoreError::job_not_found(lease.job_id))?;

        if !job.holds(lease) {
            if job.worker_id.as_deref() == Some(lease.worker_id.as_str())
                && job.records(lease.attempt, &outcome)
            {
                return Ok(());
            }
            return Err(stale(lease));
        }

        job.status = outcome.status();
        match outcome {
            Outcome::Succeeded { result_ref } => job.result_ref = Some(result_ref),
            Outcome::Failed { error } => job.error_message = Some(truncate_summary(&error)),
        }
        job.lease_expires_at = None;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn status(&self, job_id: JobId) -> Result<Job, CoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::job_not_found(job_id))?;

        if job.has_expired_lease(now) {
            revert_to_pending(job, now);
        }
        Ok(job.clone())
    }

    async fn cancel(&self, job_id: JobId) -> Result<bool, CoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::job_not_found(job_id))?;

        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = JobStatus::Cancelled;
        job.lease_expires_at = None;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn retry(&self, job_id: JobId) -> Result<JobId, CoreError> {
        let mut jobs = self.jobs.lock().await;
        let original = jobs
            .get(&job_id)
            .ok_or_else(|| CoreError::job_not_found(job_id))?;
        ensure_retryable(original)?;

        let input = SubmitJob {
            params: original.params.clone(),
            priority: original.priority,
        };
        let id = new_job_id();
        jobs.insert(id, Job::new(id, &input, Some(job_id), Utc::now()));
        Ok(id)
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, CoreError> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<&Job> = jobs
            .values()
            .filter(|job| query.status.is_none_or(|status| job.status == status))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(matching
            .into_iter()
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn reap_expired(&self) -> Result<u64, CoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let mut reverted = 0;
        for job in jobs.values_mut().filter(|job| job.has_expired_lease(now)) {
            tracing::info!(
                job_id = %job.id,
                worker_id = job.worker_id.as_deref().unwrap_or_default(),
                attempt = job.attempt,
                "Lease expired, job returned to pending",
            );
            revert_to_pending(job, now);
            reverted += 1;
        }
        Ok(reverted)
    }
}
