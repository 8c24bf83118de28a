//! Job lifecycle model: status, leases and completion outcomes.
//!
//! Status transitions are `Pending -> Running -> {Succeeded, Failed}`, plus
//! `Running -> Pending` when a lease expires and `{Pending, Running} ->
//! Cancelled` on explicit cancellation. The helpers here are pure; both
//! queue backends apply them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, JobParams, Timestamp};

/// Maximum page size for job listing.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Error summaries stored on failed jobs are truncated to this many chars.
pub const MAX_ERROR_SUMMARY_LEN: usize = 2000;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the lowercase wire name.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::Validation(format!(
                "Unknown job status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One generation request tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub params: JobParams,
    pub status: JobStatus,
    pub priority: i32,
    /// Number of times the job has been claimed.
    pub attempt: i32,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<Timestamp>,
    /// Artifact name of the output. Set only when `Succeeded`.
    pub result_ref: Option<String>,
    /// Non-empty whenever the job is `Failed`.
    pub error_message: Option<String>,
    pub retry_of: Option<JobId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// A fresh pending job.
    pub fn new(id: JobId, input: &SubmitJob, retry_of: Option<JobId>, now: Timestamp) -> Self {
        Self {
            id,
            params: input.params.clone(),
            status: JobStatus::Pending,
            priority: input.priority,
            attempt: 0,
            worker_id: None,
            lease_expires_at: None,
            result_ref: None,
            error_message: None,
            retry_of,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// `true` if the job is running under a lease that has run out.
    pub fn has_expired_lease(&self, now: Timestamp) -> bool {
        self.status == JobStatus::Running
            && self.lease_expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// `true` if `lease` is the job's current lease generation.
    ///
    /// An expired lease stays current until someone else claims the job or
    /// it is reverted to pending.
    pub fn holds(&self, lease: &WorkerLease) -> bool {
        self.status == JobStatus::Running
            && self.attempt == lease.attempt
            && self.worker_id.as_deref() == Some(lease.worker_id.as_str())
    }

    /// The current lease, if the job is running.
    pub fn lease(&self) -> Option<WorkerLease> {
        match (self.status, &self.worker_id, self.lease_expires_at) {
            (JobStatus::Running, Some(worker_id), Some(expires_at)) => Some(WorkerLease {
                job_id: self.id,
                worker_id: worker_id.clone(),
                attempt: self.attempt,
                expires_at,
            }),
            _ => None,
        }
    }

    /// Whether this terminal job already records exactly `outcome` for the
    /// lease generation `attempt`. Used to make `complete` idempotent.
    pub fn records(&self, attempt: i32, outcome: &Outcome) -> bool {
        if self.attempt != attempt {
            return false;
        }
        match outcome {
            Outcome::Succeeded { result_ref } => {
                self.status == JobStatus::Succeeded
                    && self.result_ref.as_deref() == Some(result_ref.as_str())
            }
            Outcome::Failed { error } => {
                self.status == JobStatus::Failed
                    && self.error_message.as_deref() == Some(truncate_summary(error).as_str())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// A time-bounded exclusive claim a worker holds on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLease {
    pub job_id: JobId,
    pub worker_id: String,
    /// Claim generation. Bumped on every claim so an old holder can be told
    /// apart from a new one even when both use the same worker id.
    pub attempt: i32,
    pub expires_at: Timestamp,
}

impl WorkerLease {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Compute a lease expiry `duration` after `now`.
pub fn lease_expiry(now: Timestamp, duration: Duration) -> Result<Timestamp, CoreError> {
    let delta = chrono::Duration::from_std(duration)
        .map_err(|_| CoreError::Validation(format!("Lease duration {duration:?} is too large")))?;
    now.checked_add_signed(delta)
        .ok_or_else(|| CoreError::Validation(format!("Lease duration {duration:?} overflows")))
}

/// Reject zero-length leases; they would be reclaimable immediately.
pub fn validate_lease_duration(duration: Duration) -> Result<(), CoreError> {
    if duration.is_zero() {
        return Err(CoreError::Validation(
            "Lease duration must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a worker finished a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded { result_ref: String },
    Failed { error: String },
}

impl Outcome {
    pub fn succeeded(result_ref: impl Into<String>) -> Self {
        Self::Succeeded {
            result_ref: result_ref.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded { .. } => JobStatus::Succeeded,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }

    /// A failed job must carry a non-empty error summary and a succeeded
    /// one a non-empty result reference.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Succeeded { result_ref } if result_ref.trim().is_empty() => Err(
                CoreError::Validation("Result reference must not be empty".to_string()),
            ),
            Self::Failed { error } if error.trim().is_empty() => Err(CoreError::Validation(
                "Failed outcome requires a non-empty error summary".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Clamp an error summary to [`MAX_ERROR_SUMMARY_LEN`] characters.
pub fn truncate_summary(error: &str) -> String {
    error.trim().chars().take(MAX_ERROR_SUMMARY_LEN).collect()
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Input for submitting a new job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJob {
    #[serde(alias = "parameters")]
    pub params: JobParams,
    #[serde(default)]
    pub priority: i32,
}

impl SubmitJob {
    pub fn new(params: JobParams) -> Self {
        Self {
            params,
            priority: 0,
        }
    }

    /// Build from arbitrary JSON; only objects are accepted.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CoreError> {
        match value {
            serde_json::Value::Object(params) => Ok(Self::new(params)),
            other => Err(CoreError::Validation(format!(
                "Job parameters must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

impl JobListQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::new_job_id;

    fn running_job(worker: &str, attempt: i32, expires_in_secs: i64) -> Job {
        let now = Utc::now();
        let mut job = Job::new(new_job_id(), &SubmitJob::default(), None, now);
        job.status = JobStatus::Running;
        job.attempt = attempt;
        job.worker_id = Some(worker.to_string());
        job.lease_expires_at = Some(now + chrono::Duration::seconds(expires_in_secs));
        job
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_name(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::from_name("done").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn expired_lease_detection() {
        let job = running_job("w-1", 1, -1);
        assert!(job.has_expired_lease(Utc::now()));

        let job = running_job("w-1", 1, 60);
        assert!(!job.has_expired_lease(Utc::now()));
    }

    #[test]
    fn holds_requires_same_attempt_and_worker() {
        let job = running_job("w-1", 2, 60);
        let lease = job.lease().unwrap();
        assert!(job.holds(&lease));

        let older = WorkerLease {
            attempt: 1,
            ..lease.clone()
        };
        assert!(!job.holds(&older));

        let other = WorkerLease {
            worker_id: "w-2".into(),
            ..lease
        };
        assert!(!job.holds(&other));
    }

    #[test]
    fn failed_outcome_requires_summary() {
        assert!(Outcome::failed("  ").validate().is_err());
        assert!(Outcome::failed("model crashed").validate().is_ok());
        assert!(Outcome::succeeded("").validate().is_err());
    }

    #[test]
    fn records_matches_exact_outcome() {
        let mut job = running_job("w-1", 1, 60);
        job.status = JobStatus::Succeeded;
        job.result_ref = Some("outputs/abc.wav".into());

        assert!(job.records(1, &Outcome::succeeded("outputs/abc.wav")));
        assert!(!job.records(1, &Outcome::succeeded("outputs/def.wav")));
        assert!(!job.records(2, &Outcome::succeeded("outputs/abc.wav")));
        assert!(!job.records(1, &Outcome::failed("nope")));
    }

    #[test]
    fn submit_rejects_non_object_params() {
        assert!(SubmitJob::from_value(serde_json::json!(["calm piano"])).is_err());
        let input = SubmitJob::from_value(serde_json::json!({"prompt": "calm piano"})).unwrap();
        assert_eq!(input.params["prompt"], "calm piano");
    }

    #[test]
    fn list_limit_is_clamped() {
        let q = JobListQuery::default();
        assert_eq!(q.effective_limit(), DEFAULT_LIST_LIMIT);

        let q = JobListQuery {
            limit: Some(1000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), MAX_LIST_LIMIT);
        assert_eq!(q.effective_offset(), 0);
    }

    #[test]
    fn zero_lease_is_rejected() {
        assert!(validate_lease_duration(Duration::ZERO).is_err());
        assert!(validate_lease_duration(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn long_summaries_are_truncated() {
        let summary = truncate_summary(&"x".repeat(MAX_ERROR_SUMMARY_LEN + 10));
        assert_eq!(summary.len(), MAX_ERROR_SUMMARY_LEN);
    }
}
