//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the session router.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::constants::SERVICE_ID;
use crate::error::FourdError;
use crate::utils::now_iso;

#[derive(Deserialize)]
struct CreateSessionRequest {
    session_id: String,
}

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{session_id}",
            axum::routing::delete(delete_session),
        )
        .route("/api/sessions/{session_id}/stop", post(stop_session))
        .route("/ws/{role}/{session_id}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "server_time": now_iso(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "sessions": state.router.session_summaries().len(),
        "dropped_frames": state.router.dropped_frame_count(),
    }))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "sessions": state.router.session_summaries() }))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Response {
    if request.session_id.is_empty() {
        return FourdError::InvalidRequest("session_id must not be empty".into()).into_response();
    }
    if state.router.create_session(&request.session_id) {
        (
            StatusCode::CREATED,
            Json(json!({ "session_id": request.session_id })),
        )
            .into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "session already exists" })),
        )
            .into_response()
    }
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.router.delete_session(&session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        FourdError::SessionNotFound(session_id).into_response()
    }
}

/// Emergency stop over REST: fans a stop signal out to every socket in
/// the session.
async fn stop_session(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    if state.router.broadcast_stop(&session_id, "rest") {
        Json(json!({ "status": "stopped", "session_id": session_id })).into_response()
    } else {
        FourdError::SessionNotFound(session_id).into_response()
    }
}
