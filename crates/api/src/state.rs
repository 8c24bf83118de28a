use std::sync::Arc;

use melodia_core::artifact::ArtifactStore;
use melodia_core::queue::JobQueue;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job queue backend.
    pub queue: Arc<dyn JobQueue>,
    /// Artifact store holding model weights and generated outputs.
    pub store: Arc<dyn ArtifactStore>,
    pub config: Arc<ServerConfig>,
}
