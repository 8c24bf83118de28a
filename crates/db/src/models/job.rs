//! Row model for the `jobs` table.

use melodia_core::error::CoreError;
use melodia_core::job::Job;
use melodia_core::types::{JobId, Timestamp};
use sqlx::FromRow;

use super::status::{status_from_id, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub params: serde_json::Value,
    pub status_id: StatusId,
    pub priority: i32,
    pub attempt: i32,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<Timestamp>,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub retry_of: Option<JobId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for Job {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = status_from_id(row.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "Job {} has unknown status_id {}",
                row.id, row.status_id
            ))
        })?;
        let params = match row.params {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(CoreError::Internal(format!(
                    "Job {} has non-object params: {other}",
                    row.id
                )))
            }
        };

        Ok(Job {
            id: row.id,
            params,
            status,
            priority: row.priority,
            attempt: row.attempt,
            worker_id: row.worker_id,
            lease_expires_at: row.lease_expires_at,
            result_ref: row.result_ref,
            error_message: row.error_message,
            retry_of: row.retry_of,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use melodia_core::job::JobStatus;

    use super::*;
    use crate::models::status::RUNNING;

    fn row(params: serde_json::Value, status_id: StatusId) -> JobRow {
        let now = Utc::now();
        JobRow {
            id: uuid::Uuid::now_v7(),
            params,
            status_id,
            priority: 0,
            attempt: 1,
            worker_id: Some("w-1".into()),
            lease_expires_at: Some(now),
            result_ref: None,
            error_message: None,
            retry_of: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn converts_valid_row() {
        let job = Job::try_from(row(serde_json::json!({"prompt": "calm piano"}), RUNNING)).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.params["prompt"], "calm piano");
        assert!(job.lease().is_some());
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(Job::try_from(row(serde_json::json!({}), 42)).is_err());
    }

    #[test]
    fn rejects_non_object_params() {
        assert!(Job::try_from(row(serde_json::json!([1, 2]), RUNNING)).is_err());
    }
}
