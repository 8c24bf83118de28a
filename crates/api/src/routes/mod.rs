pub mod artifacts;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                      list, submit
/// /jobs/{id}                 get
/// /jobs/{id}/cancel          cancel (POST)
/// /jobs/{id}/retry           retry (POST)
///
/// /artifacts/{*name}         download artifact bytes
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/artifacts", artifacts::router())
}
