/// Jobs are identified by time-ordered UUIDs (v7), generated at submission.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque key-value job parameters. The queue never interprets them.
pub type JobParams = serde_json::Map<String, serde_json::Value>;

/// Generate a fresh job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
