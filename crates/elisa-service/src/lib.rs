#![forbid(unsafe_code)]

//! **elisa-service** – HTTP surface for the elisa build orchestrator.
//!
//! Thin transport over the session store: routes map onto store operations,
//! orchestrator errors map onto status codes, and each started session gets
//! one consumer task that drains its event stream into an in-memory log.
//! The core never surfaces structured exceptions here; callers see events
//! and status codes only.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use elisa_orchestration::SessionStore;
use elisa_types::{BuildEvent, NuggetSpec, OrchestratorError, SpecIssue};
use elisa_workspace::{export_zip, ExportError};

pub mod dryrun;

//─────────────────────────────
//  Service state
//─────────────────────────────

/// Shared state behind every route.
#[derive(Clone)]
pub struct ServiceState {
    /// The session registry.
    pub store: Arc<SessionStore>,
    /// Ordered event log per started session, filled by the drain task.
    pub event_logs: Arc<DashMap<String, Arc<Mutex<Vec<BuildEvent>>>>>,
}

impl ServiceState {
    /// Create service state over a store.
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store, event_logs: Arc::new(DashMap::new()) }
    }

    /// Snapshot of a session's accumulated events.
    pub fn events(&self, session_id: &str) -> Vec<BuildEvent> {
        self.event_logs
            .get(session_id)
            .map(|log| log.lock().expect("event log poisoned").clone())
            .unwrap_or_default()
    }
}

//─────────────────────────────
//  API types
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct StartRequest {
    spec: NuggetSpec,
    #[serde(default)]
    workspace_path: Option<String>,
    #[serde(default)]
    workspace_json: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GateRequest {
    approved: bool,
    #[serde(default)]
    feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionRequest {
    task_id: String,
    answers: Value,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<SpecIssue>,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(ErrorBody { detail: detail.into(), errors: Vec::new() })).into_response()
}

fn map_error(err: OrchestratorError) -> Response {
    match err {
        OrchestratorError::InvalidSpec(errors) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { detail: "Invalid NuggetSpec".to_string(), errors }),
        )
            .into_response(),
        OrchestratorError::WorkspacePathRejected(reason) => {
            error_response(StatusCode::BAD_REQUEST, format!("workspace path rejected: {reason}"))
        }
        OrchestratorError::AlreadyStarted => {
            error_response(StatusCode::CONFLICT, "session already started")
        }
        OrchestratorError::UnknownSession(id) => {
            error_response(StatusCode::NOT_FOUND, format!("unknown session: {id}"))
        }
        OrchestratorError::Transient(detail) => error_response(StatusCode::CONFLICT, detail),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

//─────────────────────────────
//  Router
//─────────────────────────────

/// Build the HTTP application.
pub fn create_app(state: ServiceState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/start", post(start_session))
        .route("/api/sessions/:id/stop", post(stop_session))
        .route("/api/sessions/:id/tasks", get(get_tasks))
        .route("/api/sessions/:id/git", get(get_git_log))
        .route("/api/sessions/:id/tests", get(get_test_report))
        .route("/api/sessions/:id/gate", post(respond_gate))
        .route("/api/sessions/:id/question", post(respond_question))
        .route("/api/sessions/:id/export", get(export_workspace))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

//─────────────────────────────
//  Handlers
//─────────────────────────────

async fn create_session(State(state): State<ServiceState>) -> Response {
    let session_id = state.store.create();
    (StatusCode::OK, Json(serde_json::json!({ "session_id": session_id }))).into_response()
}

async fn get_session(State(state): State<ServiceState>, Path(id): Path<String>) -> Response {
    match state.store.snapshot(&id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => map_error(err),
    }
}

async fn start_session(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<StartRequest>,
) -> Response {
    let mut rx = match state.store.start(&id, request.spec, request.workspace_path) {
        Ok(rx) => rx,
        Err(err) => return map_error(err),
    };

    // Caller-supplied workspace state, persisted alongside the artifacts.
    if let Some(workspace_json) = request.workspace_json {
        if let Ok(orchestrator) = state.store.orchestrator(&id) {
            let path = orchestrator.workspace().join("workspace.json");
            if let Ok(json) = serde_json::to_string_pretty(&workspace_json) {
                let _ = std::fs::write(path, json + "\n");
            }
        }
    }

    // The one consumer per session: drain the stream into the event log.
    let log = Arc::new(Mutex::new(Vec::new()));
    state.event_logs.insert(id.clone(), log.clone());
    let session_id = id.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug!(session_id = %session_id, event = ?event, "session event");
            log.lock().expect("event log poisoned").push(event);
        }
    });

    info!(session_id = %id, "session started over http");
    (StatusCode::OK, Json(serde_json::json!({ "status": "started" }))).into_response()
}

async fn stop_session(State(state): State<ServiceState>, Path(id): Path<String>) -> Response {
    match state.store.stop(&id) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "stopped" }))).into_response(),
        Err(err) => map_error(err),
    }
}

async fn get_tasks(State(state): State<ServiceState>, Path(id): Path<String>) -> Response {
    match state.store.snapshot(&id) {
        Ok(snapshot) => Json(snapshot.tasks).into_response(),
        Err(err) => map_error(err),
    }
}

async fn get_git_log(State(state): State<ServiceState>, Path(id): Path<String>) -> Response {
    if !state.store.contains(&id) {
        return map_error(OrchestratorError::UnknownSession(id));
    }
    match state.store.orchestrator(&id) {
        Ok(orchestrator) => Json(orchestrator.git_log()).into_response(),
        Err(_) => error_response(StatusCode::CONFLICT, "session not started"),
    }
}

async fn get_test_report(State(state): State<ServiceState>, Path(id): Path<String>) -> Response {
    if !state.store.contains(&id) {
        return map_error(OrchestratorError::UnknownSession(id));
    }
    match state.store.orchestrator(&id) {
        Ok(orchestrator) => Json(orchestrator.test_report().unwrap_or_default()).into_response(),
        Err(_) => error_response(StatusCode::CONFLICT, "session not started"),
    }
}

async fn respond_gate(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<GateRequest>,
) -> Response {
    match state.store.respond_to_gate(&id, request.approved, request.feedback) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response(),
        Err(err) => map_error(err),
    }
}

async fn respond_question(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<QuestionRequest>,
) -> Response {
    match state.store.respond_to_question(&id, &request.task_id, request.answers) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response(),
        Err(err) => map_error(err),
    }
}

async fn export_workspace(State(state): State<ServiceState>, Path(id): Path<String>) -> Response {
    if !state.store.contains(&id) {
        return map_error(OrchestratorError::UnknownSession(id));
    }
    let orchestrator = match state.store.orchestrator(&id) {
        Ok(orchestrator) => orchestrator,
        Err(_) => return error_response(StatusCode::CONFLICT, "session not started"),
    };

    let workspace = orchestrator.workspace().to_path_buf();
    let user_supplied = orchestrator.user_workspace();
    let archive = tokio::task::spawn_blocking(move || export_zip(&workspace, user_supplied)).await;

    match archive {
        Ok(Ok(bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{id}.zip\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(Err(ExportError::OutsideTemp)) => {
            error_response(StatusCode::FORBIDDEN, "workspace is outside the OS temp directory")
        }
        Ok(Err(ExportError::NotFound)) => error_response(StatusCode::NOT_FOUND, "workspace not found"),
        Ok(Err(err)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        Err(join_error) => error_response(StatusCode::INTERNAL_SERVER_ERROR, join_error.to_string()),
    }
}
