use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, ETAG};
use axum::response::IntoResponse;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /api/v1/artifacts/{*name}
///
/// Raw artifact bytes. The `ETag` is the SHA-256 of the content, which never
/// changes for a given name.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let artifact = state.store.stat(&name).await?;
    let bytes = state.store.get(&name).await?;

    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (ETAG, format!("\"{}\"", artifact.content_hash)),
        ],
        bytes,
    ))
}
