#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use melodia_api::config::ServerConfig;
use melodia_api::router::build_app_router;
use melodia_api::state::AppState;
use melodia_core::artifact::MemoryArtifactStore;
use melodia_core::queue::MemoryJobQueue;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
    }
}

/// Backends behind a test app, kept so tests can act as a worker.
pub struct TestBackends {
    pub queue: Arc<MemoryJobQueue>,
    pub store: Arc<MemoryArtifactStore>,
}

/// Build the full application router over in-memory backends.
///
/// Uses the same [`build_app_router`] as `main.rs`, so tests exercise the
/// production middleware stack.
pub fn build_test_app() -> (Router, TestBackends) {
    let queue = Arc::new(MemoryJobQueue::new());
    let store = Arc::new(MemoryArtifactStore::new());
    let config = test_config();

    let state = AppState {
        queue: queue.clone(),
        store: store.clone(),
        config: Arc::new(config.clone()),
    };

    (build_app_router(state, &config), TestBackends { queue, store })
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
