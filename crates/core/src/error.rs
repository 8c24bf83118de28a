use std::time::Duration;

use crate::types::JobId;

/// Error taxonomy shared by the queue, the artifact stores, the worker and
/// the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Queue or store backend unreachable. Surfaced, never retried by the core.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The caller's lease on a job is no longer current (expired and
    /// reclaimed, released, or the job moved on). Results must be discarded.
    #[error("Stale lease on job {job_id} (attempt {attempt})")]
    StaleLease { job_id: JobId, attempt: i32 },

    /// An artifact name is already bound to different content.
    #[error("Artifact conflict: '{name}' already exists with different content")]
    ArtifactConflict { name: String },

    #[error("Entity not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    /// The generation capability raised an error.
    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    /// Network-class failure that may succeed if retried (fetch timeout,
    /// dropped connection, corrupted transfer).
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The client gave up waiting. The job itself keeps running.
    #[error("Timed out after {waited:?} waiting for job {job_id}")]
    WaitTimeout { job_id: JobId, waited: Duration },

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: JobId },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a missing job.
    pub fn job_not_found(job_id: JobId) -> Self {
        Self::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        }
    }

    /// Shorthand for a missing artifact.
    pub fn artifact_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Artifact",
            id: name.into(),
        }
    }

    /// Whether a worker should give the job back to the queue instead of
    /// recording a terminal failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
