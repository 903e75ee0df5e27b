//! Operator status endpoint for the hub.
//!
//! A trivial HTTP surface on the local network: liveness plus a
//! one-page snapshot of bus, device, and scheduler state.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::constants::SERVICE_ID;
use crate::hub::LocalHub;
use crate::utils::now_iso;

pub fn create_router(hub: Arc<LocalHub>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .with_state(hub)
}

async fn health_check(State(hub): State<Arc<LocalHub>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "hub_id": hub.config().device_hub_id,
        "server_time": now_iso(),
    }))
}

async fn status(State(hub): State<Arc<LocalHub>>) -> impl IntoResponse {
    Json(hub.status_snapshot())
}

/// Serves the status endpoint until the hub shuts down.
pub async fn serve(hub: Arc<LocalHub>) -> std::io::Result<()> {
    let port = hub.config().status_port;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("[Hub] status endpoint on http://0.0.0.0:{}", port);

    let cancel = hub.cancel_token();
    let app = create_router(hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
