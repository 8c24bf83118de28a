//! Handlers for the `/jobs` resource.
//!
//! Jobs are executed by separate worker processes; these endpoints only
//! submit, inspect, cancel and resubmit them.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use melodia_core::job::{JobListQuery, SubmitJob};
use melodia_core::types::JobId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new generation job. Returns 201 with the created job, which
/// starts in `pending` status until a worker claims it. A body that does not
/// parse (including non-object params) is a 400.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJob>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    let job_id = state.queue.submit(input).await?;
    let job = state.queue.status(job_id).await?;

    tracing::info!(job_id = %job.id, priority = job.priority, "Job submitted");

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List jobs, newest first. Supports optional `status`, `limit`, and
/// `offset` query parameters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.queue.list(&params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
///
/// Current status, result reference and error summary of one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.queue.status(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a pending or running job. Returns 204 on success, 409 if the job
/// is already in a terminal state. A running worker notices at its next
/// lease renewal and discards its result.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    if !state.queue.cancel(job_id).await? {
        return Err(AppError::Conflict(
            "Job is already in a terminal state and cannot be cancelled".into(),
        ));
    }

    tracing::info!(job_id = %job_id, "Job cancelled");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Create a new job from a failed or cancelled job's parameters. The new
/// job has `retry_of` pointing to the original and starts in `pending`
/// status. No automatic retry exists.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let new_id = state.queue.retry(job_id).await?;
    let new_job = state.queue.status(new_id).await?;

    tracing::info!(original_job_id = %job_id, new_job_id = %new_id, "Job retried");

    Ok((StatusCode::CREATED, Json(DataResponse { data: new_job })))
}
