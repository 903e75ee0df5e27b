//! WebSocket upgrade and per-connection socket loop.
//!
//! Each accepted socket registers with the session router and then
//! bridges two directions: frames queued by the router are written to
//! the socket under a write deadline, and inbound text frames are
//! handed back to the router for routing. Deregistration is guaranteed
//! by the router's connection guard on every exit path.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::sink::SinkExt;
use futures::stream::StreamExt;

use crate::api::AppState;
use crate::constants::{CLOSE_SESSION_NOT_FOUND, WS_WRITE_DEADLINE_SECS};
use crate::protocol::Role;

/// WebSocket upgrade handler for `/ws/{role}/{session_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((role, session_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let role: Role = match role.parse::<Role>() {
        Ok(role) => role,
        Err(e) => return e.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, role, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, role: Role, session_id: String) {
    let (mut sender, mut receiver) = socket.split();

    if !state.catalog.session_known(&session_id) {
        log::warn!("[WS] unknown session {} on upgrade, closing", session_id);
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_SESSION_NOT_FOUND,
                reason: "Session not found".into(),
            })))
            .await;
        return;
    }

    let (guard, mut outbound) = state.router.register(&session_id, role);
    let write_deadline = Duration::from_secs(WS_WRITE_DEADLINE_SECS);

    loop {
        tokio::select! {
            // Frames the router queued for this connection
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Queue closed: the session was deleted out from under us
                    log::info!("[WS] send queue closed for {}", guard.connection_id());
                    break;
                };
                let send = sender.send(Message::Text(frame.to_string().into()));
                match tokio::time::timeout(write_deadline, send).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        log::info!("[WS] write failed for {}: {}", guard.connection_id(), e);
                        break;
                    }
                    Err(_) => {
                        // A stalled writer counts as a broken connection
                        log::warn!("[WS] write deadline hit for {}", guard.connection_id());
                        break;
                    }
                }
            }
            // Frames from the client
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.router.route(
                            guard.session_id(),
                            guard.connection_id(),
                            guard.role(),
                            text.as_str(),
                        );
                    }
                    Some(Ok(Message::Binary(_))) => {
                        log::warn!(
                            "[WS] binary frame from {}, dropped",
                            guard.connection_id()
                        );
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Protocol-level ping/pong is handled by axum
                    _ => {}
                }
            }
        }
    }

    // ConnectionGuard drop deregisters from the router
}
