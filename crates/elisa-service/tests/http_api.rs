//! HTTP surface tests driven through the router with dry-run collaborators.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use elisa_orchestration::{SessionStore, StoreConfig};
use elisa_service::{create_app, dryrun, ServiceState};

fn app() -> Router {
    let store = SessionStore::new(
        dryrun::collaborators(),
        StoreConfig { cleanup_grace: Duration::from_secs(600), ..StoreConfig::default() },
    );
    create_app(ServiceState::new(store))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_session(app: &Router) -> String {
    let response = app.clone().oneshot(post_json("/api/sessions", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["session_id"].as_str().unwrap().to_string()
}

fn minimal_start_body() -> Value {
    json!({"spec": {"nugget": {"goal": "todo app", "type": "software"}, "workflow": {}}})
}

/// Poll the session until it reaches `done`.
async fn wait_for_done(app: &Router, id: &str) -> Value {
    for _ in 0..200 {
        let response = app.clone().oneshot(get(&format!("/api/sessions/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = body_json(response).await;
        if snapshot["state"] == "done" {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("session {id} never reached done");
}

#[tokio::test]
async fn create_then_fetch_round_trips() {
    let app = app();
    let id = create_session(&app).await;

    let response = app.clone().oneshot(get(&format!("/api/sessions/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["session_id"], id.as_str());
    assert_eq!(snapshot["state"], "idle");
}

#[tokio::test]
async fn unknown_session_is_404() {
    let app = app();
    let response = app.clone().oneshot(get("/api/sessions/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_spec_returns_structured_400() {
    let app = app();
    let id = create_session(&app).await;

    let body = json!({
        "spec": {"nugget": {"goal": "x".repeat(2001)}, "workflow": {}}
    });
    let response =
        app.clone().oneshot(post_json(&format!("/api/sessions/{id}/start"), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error = body_json(response).await;
    assert_eq!(error["detail"], "Invalid NuggetSpec");
    let errors = error["errors"].as_array().unwrap();
    assert!(errors.iter().any(|e| e["path"] == "nugget.goal"));

    // The session stayed idle and can be started with a valid spec.
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/sessions/{id}/start"), minimal_start_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversized_workspace_path_returns_400() {
    let app = app();
    let id = create_session(&app).await;

    let long_path = format!("/tmp/{}", "a".repeat(501));
    let mut body = minimal_start_body();
    body["workspace_path"] = json!(long_path);
    let response =
        app.clone().oneshot(post_json(&format!("/api/sessions/{id}/start"), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[cfg(unix)]
#[tokio::test]
async fn blocked_workspace_path_returns_400() {
    let app = app();
    let id = create_session(&app).await;

    let mut body = minimal_start_body();
    body["workspace_path"] = json!("/etc/elisa-workspace");
    let response =
        app.clone().oneshot(post_json(&format!("/api/sessions/{id}/start"), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn concurrent_start_yields_one_200_and_one_409() {
    let app = app();
    let id = create_session(&app).await;

    let uri = format!("/api/sessions/{id}/start");
    let (a, b) = tokio::join!(
        app.clone().oneshot(post_json(&uri, minimal_start_body())),
        app.clone().oneshot(post_json(&uri, minimal_start_body())),
    );
    let statuses = [a.unwrap().status(), b.unwrap().status()];

    assert!(statuses.contains(&StatusCode::OK), "statuses: {statuses:?}");
    assert!(statuses.contains(&StatusCode::CONFLICT), "statuses: {statuses:?}");

    let snapshot = wait_for_done(&app, &id).await;
    assert_eq!(snapshot["state"], "done");
}

#[tokio::test]
async fn tasks_and_git_reflect_a_finished_session() {
    let app = app();
    let id = create_session(&app).await;

    // Before start, the git log requires an orchestrator.
    let response = app.clone().oneshot(get(&format!("/api/sessions/{id}/git"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/sessions/{id}/start"), minimal_start_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "started");

    wait_for_done(&app, &id).await;

    let response = app.clone().oneshot(get(&format!("/api/sessions/{id}/tasks"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let tasks = body_json(response).await;
    let tasks = tasks.as_array().unwrap();
    assert!(!tasks.is_empty());
    assert!(tasks.iter().all(|t| t["status"] == "completed"));

    let response = app.clone().oneshot(get(&format!("/api/sessions/{id}/git"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let commits = body_json(response).await;
    assert!(!commits.as_array().unwrap().is_empty());

    let response = app.clone().oneshot(get(&format!("/api/sessions/{id}/tests"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn stop_closes_the_session() {
    let app = app();
    let id = create_session(&app).await;

    let response =
        app.clone().oneshot(post_json(&format!("/api/sessions/{id}/stop"), json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = wait_for_done(&app, &id).await;
    assert_eq!(snapshot["state"], "done");

    // Idempotent.
    let response =
        app.clone().oneshot(post_json(&format!("/api/sessions/{id}/stop"), json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn gate_response_with_nothing_pending_is_409() {
    let app = app();
    let id = create_session(&app).await;

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/sessions/{id}/start"), minimal_start_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_done(&app, &id).await;

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/sessions/{id}/gate"), json!({"approved": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/sessions/{id}/question"),
            json!({"task_id": "build-core", "answers": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn export_streams_a_zip_of_the_workspace() {
    let app = app();
    let id = create_session(&app).await;

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/sessions/{id}/start"), minimal_start_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_done(&app, &id).await;

    let response = app.clone().oneshot(get(&format!("/api/sessions/{id}/export"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap(),
        "application/zip"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    // ZIP archives are either empty (end-of-central-directory only) or start
    // with the local file header magic.
    assert!(bytes.len() >= 4);
    assert!(bytes.starts_with(b"PK"));
}
