//! [`JobQueue`] backed by PostgreSQL.

use std::time::Duration;

use async_trait::async_trait;
use melodia_core::error::CoreError;
use melodia_core::job::{validate_lease_duration, Job, JobListQuery, Outcome, SubmitJob, WorkerLease};
use melodia_core::queue::{ensure_retryable, ClaimedJob, JobQueue};
use melodia_core::types::{new_job_id, JobId};

use crate::models::job::JobRow;
use crate::repositories::JobRepo;
use crate::DbPool;

/// Durable job queue over the `jobs` table. Cheap to clone.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn find(&self, job_id: JobId) -> Result<Job, CoreError> {
        let row = JobRepo::find_by_id(&self.pool, job_id)
            .await
            .map_err(db_error)?
            .ok_or_else(|| CoreError::job_not_found(job_id))?;
        Job::try_from(row)
    }

    /// Explain why a lease-guarded update matched no row.
    async fn stale_or_missing(&self, lease: &WorkerLease) -> CoreError {
        match self.find(lease.job_id).await {
            Ok(_) => CoreError::StaleLease {
                job_id: lease.job_id,
                attempt: lease.attempt,
            },
            Err(e) => e,
        }
    }
}

/// Map a sqlx error onto the core taxonomy. Connectivity problems become
/// `StorageUnavailable`; anything else is an internal fault.
pub fn db_error(err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            tracing::warn!(error = %err, "Job queue database unavailable");
            CoreError::StorageUnavailable(err.to_string())
        }
        other => {
            tracing::error!(error = %other, "Job queue database error");
            CoreError::Internal(format!("Database error: {other}"))
        }
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, CoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn submit(&self, input: SubmitJob) -> Result<JobId, CoreError> {
        let row = JobRepo::insert(&self.pool, new_job_id(), &input, None)
            .await
            .map_err(db_error)?;
        tracing::debug!(job_id = %row.id, priority = row.priority, "Job submitted");
        Ok(row.id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<ClaimedJob>, CoreError> {
        validate_lease_duration(lease_duration)?;
        let Some(row) = JobRepo::claim_next(&self.pool, worker_id, lease_duration)
            .await
            .map_err(db_error)?
        else {
            return Ok(None);
        };

        let job = Job::try_from(row)?;
        let lease = job.lease().ok_or_else(|| {
            CoreError::Internal(format!("Claimed job {} has no lease", job.id))
        })?;
        Ok(Some(ClaimedJob { job, lease }))
    }

    async fn renew(
        &self,
        lease: &WorkerLease,
        lease_duration: Duration,
    ) -> Result<WorkerLease, CoreError> {
        validate_lease_duration(lease_duration)?;
        match JobRepo::renew(&self.pool, lease, lease_duration)
            .await
            .map_err(db_error)?
        {
            Some(expires_at) => Ok(WorkerLease {
                expires_at,
                ..lease.clone()
            }),
            None => Err(self.stale_or_missing(lease).await),
        }
    }

    async fn release(&self, lease: &WorkerLease) -> Result<(), CoreError> {
        if JobRepo::release(&self.pool, lease).await.map_err(db_error)? {
            Ok(())
        } else {
            Err(self.stale_or_missing(lease).await)
        }
    }

    async fn complete(&self, lease: &WorkerLease, outcome: Outcome) -> Result<(), CoreError> {
        outcome.validate()?;
        if JobRepo::complete(&self.pool, lease, &outcome)
            .await
            .map_err(db_error)?
        {
            return Ok(());
        }

        let job = self.find(lease.job_id).await?;
        if job.worker_id.as_deref() == Some(lease.worker_id.as_str())
            && job.records(lease.attempt, &outcome)
        {
            return Ok(());
        }
        Err(CoreError::StaleLease {
            job_id: lease.job_id,
            attempt: lease.attempt,
        })
    }

    async fn status(&self, job_id: JobId) -> Result<Job, CoreError> {
        JobRepo::revert_expired(&self.pool, Some(job_id))
            .await
            .map_err(db_error)?;
        self.find(job_id).await
    }

    async fn cancel(&self, job_id: JobId) -> Result<bool, CoreError> {
        if JobRepo::cancel(&self.pool, job_id).await.map_err(db_error)? {
            return Ok(true);
        }
        // Distinguish "already terminal" from "no such job".
        self.find(job_id).await.map(|_| false)
    }

    async fn retry(&self, job_id: JobId) -> Result<JobId, CoreError> {
        let original = self.find(job_id).await?;
        ensure_retryable(&original)?;

        let input = SubmitJob {
            params: original.params,
            priority: original.priority,
        };
        let row = JobRepo::insert(&self.pool, new_job_id(), &input, Some(job_id))
            .await
            .map_err(db_error)?;
        Ok(row.id)
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, CoreError> {
        let rows = JobRepo::list(&self.pool, query).await.map_err(db_error)?;
        into_jobs(rows)
    }

    async fn reap_expired(&self) -> Result<u64, CoreError> {
        let reverted = JobRepo::revert_expired(&self.pool, None)
            .await
            .map_err(db_error)?;
        if reverted > 0 {
            tracing::info!(reverted, "Expired leases returned to pending");
        }
        Ok(reverted)
    }
}
