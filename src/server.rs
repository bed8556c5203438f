//! HTTP control surface: submit, status, retrigger, stop.
//!
//! Every response is a structured outcome — supervisor and store errors
//! never cross this boundary as exceptions.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::{Error, IntakeError};
use crate::intake::Intake;
use crate::store::{BusyStore, QueueStore};
use crate::worker::{StopOutcome, Supervisor, TriggerOutcome, monitor};

/// Lines of log returned by the status endpoint.
const STATUS_LOG_TAIL_LINES: usize = 200;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<Intake>,
    pub supervisor: Supervisor,
    pub queue: QueueStore,
    pub busy: BusyStore,
    pub log_path: PathBuf,
}

/// Build the Axum router for the control surface.
pub fn control_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/messages", post(submit_message))
        .route("/api/status", get(get_status))
        .route("/api/control/retrigger", post(retrigger))
        .route("/api/control/stop-worker", post(stop_worker))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn trigger_json(outcome: &TriggerOutcome) -> serde_json::Value {
    match outcome {
        TriggerOutcome::Started { pid } => {
            serde_json::json!({"ok": true, "triggered": true, "pid": pid})
        }
        TriggerOutcome::AlreadyRunning => {
            serde_json::json!({"ok": true, "triggered": false, "reason": "already_running"})
        }
        TriggerOutcome::Blocked => serde_json::json!({
            "ok": false, "triggered": false, "reason": "nested_invocation_blocked"
        }),
        TriggerOutcome::Unavailable { reason } => {
            serde_json::json!({"ok": false, "triggered": false, "reason": reason})
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "relaybot"
    }))
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    text: String,
    #[serde(default = "default_chat_id")]
    chat_id: String,
    #[serde(default = "default_user")]
    user: String,
}

fn default_chat_id() -> String {
    "10001".to_string()
}

fn default_user() -> String {
    "Web User".to_string()
}

async fn submit_message(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> impl IntoResponse {
    match state.intake.submit(&body.text, &body.chat_id, &body.user).await {
        Ok(submission) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "task": submission.task,
                "trigger": trigger_json(&submission.trigger),
            })),
        ),
        Err(Error::Intake(IntakeError::EmptyText)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": "text is required"})),
        ),
        Err(e) => {
            tracing::error!(error = %e, "task submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"ok": false, "error": e.to_string()})),
            )
        }
    }
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let working = state.busy.read().unwrap_or_default();
    let pending = state.queue.list_unprocessed().unwrap_or_default();
    let pending_ids: Vec<i64> = pending.iter().map(|t| t.id).collect();
    let worker_pid = state.supervisor.running_pid().await;
    let log_tail = monitor::tail_log(&state.log_path, STATUS_LOG_TAIL_LINES).await;

    Json(serde_json::json!({
        "ok": true,
        "working": working,
        "worker_running": worker_pid.is_some(),
        "worker_pid": worker_pid,
        "pending_count": pending.len(),
        "pending_ids": pending_ids,
        "log_tail": log_tail,
    }))
}

async fn retrigger(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.supervisor.trigger(None).await;
    Json(serde_json::json!({"ok": true, "trigger": trigger_json(&outcome)}))
}

async fn stop_worker(State(state): State<AppState>) -> impl IntoResponse {
    let result = match state.supervisor.stop().await {
        StopOutcome::Stopped { pid } => {
            serde_json::json!({"stopped": true, "pid": pid})
        }
        StopOutcome::NotRunning => {
            serde_json::json!({"stopped": false, "reason": "not_running"})
        }
    };
    Json(serde_json::json!({"ok": true, "result": result}))
}
