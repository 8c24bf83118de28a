//! Integration tests for the `/api/v1/jobs` and `/api/v1/artifacts` routes.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_bytes, body_json, build_test_app, get, post, post_json};
use melodia_core::artifact::ArtifactStore;
use melodia_core::job::Outcome;
use melodia_core::queue::JobQueue;
use serde_json::json;

const LEASE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Submit / get
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_201_with_pending_job() {
    let (app, _) = build_test_app();
    let response = post_json(
        app.clone(),
        "/api/v1/jobs",
        json!({ "parameters": { "prompt": "calm piano", "lyrics": "[instrumental]" }, "priority": 2 }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["priority"], 2);
    assert_eq!(json["data"]["params"]["prompt"], "calm piano");

    let id = json["data"]["id"].as_str().unwrap();
    let response = get(app, &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["id"], id);
}

#[tokio::test]
async fn submit_rejects_non_object_parameters() {
    let (app, _) = build_test_app();
    let response = post_json(app.clone(), "/api/v1/jobs", json!({ "parameters": "just a string" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");

    let response = post_json(app, "/api/v1/jobs", json!({ "priority": 1 })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let (app, _) = build_test_app();
    let response = get(app, &format!("/api/v1/jobs/{}", uuid::Uuid::now_v7())).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn completed_job_reports_result_ref() {
    let (app, backends) = build_test_app();
    let response = post_json(app.clone(), "/api/v1/jobs", json!({ "params": { "prompt": "x" } })).await;
    let id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Play the worker.
    let claimed = backends.queue.claim("w-1", LEASE).await.unwrap().unwrap();
    let response = get(app.clone(), &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(body_json(response).await["data"]["status"], "running");

    backends
        .queue
        .complete(&claimed.lease, Outcome::succeeded("outputs/abc.wav"))
        .await
        .unwrap();
    let json = body_json(get(app, &format!("/api/v1/jobs/{id}")).await).await;
    assert_eq!(json["data"]["status"], "succeeded");
    assert_eq!(json["data"]["result_ref"], "outputs/abc.wav");
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_by_status_and_limits() {
    let (app, backends) = build_test_app();
    for i in 0..3 {
        post_json(app.clone(), "/api/v1/jobs", json!({ "params": { "n": i } })).await;
    }
    backends.queue.claim("w-1", LEASE).await.unwrap().unwrap();

    let all = body_json(get(app.clone(), "/api/v1/jobs").await).await;
    assert_eq!(all["data"].as_array().unwrap().len(), 3);

    let pending = body_json(get(app.clone(), "/api/v1/jobs?status=pending").await).await;
    assert_eq!(pending["data"].as_array().unwrap().len(), 2);

    let limited = body_json(get(app.clone(), "/api/v1/jobs?limit=1").await).await;
    let limited = limited["data"].as_array().unwrap();
    assert_eq!(limited.len(), 1);
    // Newest first.
    assert_eq!(limited[0]["params"]["n"], 2);

    let response = get(app, "/api/v1/jobs?status=sleeping").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Cancel / retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_then_retry() {
    let (app, _) = build_test_app();
    let response = post_json(app.clone(), "/api/v1/jobs", json!({ "params": { "prompt": "x" } })).await;
    let id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Pending jobs cannot be retried.
    let response = post(app.clone(), &format!("/api/v1/jobs/{id}/retry")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(app.clone(), &format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = post(app.clone(), &format!("/api/v1/jobs/{id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");

    let response = post(app.clone(), &format!("/api/v1/jobs/{id}/retry")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["retry_of"], id.as_str());
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["params"]["prompt"], "x");
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn artifact_download_returns_bytes_and_etag() {
    let (app, backends) = build_test_app();
    let artifact = backends
        .store
        .put("outputs/song.wav", b"RIFF....WAVE")
        .await
        .unwrap();

    let response = get(app.clone(), "/api/v1/artifacts/outputs/song.wav").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(
        response.headers()["etag"].to_str().unwrap(),
        format!("\"{}\"", artifact.content_hash)
    );
    assert_eq!(body_bytes(response).await, b"RIFF....WAVE");

    let response = get(app, "/api/v1/artifacts/outputs/missing.wav").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
