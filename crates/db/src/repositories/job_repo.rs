//! Repository for the `jobs` table.
//!
//! Every status literal goes through `models::status`; no magic numbers.
//! Lease expiry is computed and compared with the database clock (`NOW()`)
//! so workers with skewed clocks still agree on who holds a job.

use std::time::Duration;

use melodia_core::job::{JobListQuery, Outcome, SubmitJob, WorkerLease};
use melodia_core::types::{JobId, Timestamp};
use sqlx::PgPool;

use crate::models::job::JobRow;
use crate::models::status::{self, CANCELLED, PENDING, RUNNING};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, params, status_id, priority, attempt, worker_id, lease_expires_at, \
    result_ref, error_message, retry_of, created_at, updated_at, completed_at";

/// Predicate matching the row held by a lease.
const LEASE_PREDICATE: &str =
    "id = $1 AND attempt = $2 AND worker_id = $3 AND status_id = $4";

/// Provides the queue operations on background jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job.
    pub async fn insert(
        pool: &PgPool,
        id: JobId,
        input: &SubmitJob,
        retry_of: Option<JobId>,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, params, status_id, priority, retry_of) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(serde_json::Value::Object(input.params.clone()))
            .bind(PENDING)
            .bind(input.priority)
            .bind(retry_of)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the next claimable job for a worker.
    ///
    /// A job is claimable if pending, or running under an expired lease.
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent claimers never
    /// receive the same row.
    pub async fn claim_next(
        pool: &PgPool,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, worker_id = $1, attempt = attempt + 1, \
                 lease_expires_at = NOW() + make_interval(secs => $3), \
                 claimed_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $4 \
                    OR (status_id = $2 AND lease_expires_at <= NOW()) \
                 ORDER BY priority DESC, created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(worker_id)
            .bind(RUNNING)
            .bind(lease_duration.as_secs_f64())
            .bind(PENDING)
            .fetch_optional(pool)
            .await
    }

    /// Extend a live lease. Returns the new expiry, or `None` if the lease is
    /// no longer current or has already expired.
    pub async fn renew(
        pool: &PgPool,
        lease: &WorkerLease,
        lease_duration: Duration,
    ) -> Result<Option<Timestamp>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET lease_expires_at = NOW() + make_interval(secs => $5), updated_at = NOW() \
             WHERE {LEASE_PREDICATE} AND lease_expires_at > NOW() \
             RETURNING lease_expires_at"
        );
        sqlx::query_scalar::<_, Timestamp>(&query)
            .bind(lease.job_id)
            .bind(lease.attempt)
            .bind(&lease.worker_id)
            .bind(RUNNING)
            .bind(lease_duration.as_secs_f64())
            .fetch_optional(pool)
            .await
    }

    /// Return a leased job to pending. Returns `false` if the lease was stale.
    pub async fn release(pool: &PgPool, lease: &WorkerLease) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $5, worker_id = NULL, lease_expires_at = NULL, updated_at = NOW() \
             WHERE {LEASE_PREDICATE}"
        );
        let result = sqlx::query(&query)
            .bind(lease.job_id)
            .bind(lease.attempt)
            .bind(&lease.worker_id)
            .bind(RUNNING)
            .bind(PENDING)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a terminal outcome for the leased attempt. Returns `false` if
    /// the lease was stale (nothing written).
    pub async fn complete(
        pool: &PgPool,
        lease: &WorkerLease,
        outcome: &Outcome,
    ) -> Result<bool, sqlx::Error> {
        let (result_ref, error_message) = match outcome {
            Outcome::Succeeded { result_ref } => (Some(result_ref.as_str()), None),
            Outcome::Failed { error } => (None, Some(melodia_core::job::truncate_summary(error))),
        };
        let query = format!(
            "UPDATE jobs \
             SET status_id = $5, result_ref = $6, error_message = $7, \
                 lease_expires_at = NULL, completed_at = NOW(), updated_at = NOW() \
             WHERE {LEASE_PREDICATE}"
        );
        let result = sqlx::query(&query)
            .bind(lease.job_id)
            .bind(lease.attempt)
            .bind(&lease.worker_id)
            .bind(RUNNING)
            .bind(status::status_id(outcome.status()))
            .bind(result_ref)
            .bind(error_message)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revert expired running jobs to pending. With `job_id`, only that job.
    pub async fn revert_expired(
        pool: &PgPool,
        job_id: Option<JobId>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $1, worker_id = NULL, lease_expires_at = NULL, updated_at = NOW() \
             WHERE status_id = $2 AND lease_expires_at <= NOW() \
               AND ($3::UUID IS NULL OR id = $3)",
        )
        .bind(PENDING)
        .bind(RUNNING)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancel a job if it is not already in a terminal state.
    ///
    /// Returns `true` if the job was cancelled, `false` if it was already
    /// succeeded, failed, or cancelled (or does not exist).
    pub async fn cancel(pool: &PgPool, job_id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, lease_expires_at = NULL, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id IN ($3, $4)",
        )
        .bind(job_id)
        .bind(CANCELLED)
        .bind(PENDING)
        .bind(RUNNING)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs with optional status filter and pagination, newest first.
    pub async fn list(pool: &PgPool, params: &JobListQuery) -> Result<Vec<JobRow>, sqlx::Error> {
        let (where_clause, limit_idx) = match params.status {
            Some(_) => ("WHERE status_id = $1", 2),
            None => ("", 1),
        };
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${limit_idx} OFFSET ${}",
            limit_idx + 1,
        );

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(s) = params.status {
            q = q.bind(status::status_id(s));
        }
        q.bind(params.effective_limit())
            .bind(params.effective_offset())
            .fetch_all(pool)
            .await
    }
}
