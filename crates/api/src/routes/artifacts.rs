use axum::routing::get;
use axum::Router;

use crate::handlers::artifacts;
use crate::state::AppState;

/// Routes mounted at `/artifacts`.
///
/// ```text
/// GET    /{*name}         -> download_artifact
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{*name}", get(artifacts::download_artifact))
}
