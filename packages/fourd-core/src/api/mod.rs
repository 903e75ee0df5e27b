//! HTTP/WebSocket API layer of the cloud edge.
//!
//! Thin handlers that delegate to the session router. This module
//! provides router construction and server startup.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::router::SessionRouter;

pub mod http;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// External knowledge of which session ids are valid.
///
/// The edge validates an upgrade against this catalog and closes with
/// 4004 when the session is unknown. Deployments without a backing
/// store use [`AllowAllCatalog`], which makes sessions implicit.
pub trait SessionCatalog: Send + Sync {
    fn session_known(&self, session_id: &str) -> bool;
}

/// Accepts every session id.
pub struct AllowAllCatalog;

impl SessionCatalog for AllowAllCatalog {
    fn session_known(&self, _session_id: &str) -> bool {
        true
    }
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// Per-session fan-out routing.
    pub router: Arc<SessionRouter>,
    /// Session validation on upgrade.
    pub catalog: Arc<dyn SessionCatalog>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    router: Option<Arc<SessionRouter>>,
    catalog: Option<Arc<dyn SessionCatalog>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(mut self, router: Arc<SessionRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn SessionCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            router: self.router.expect("router is required"),
            catalog: self.catalog.unwrap_or_else(|| Arc::new(AllowAllCatalog)),
            started_at: Instant::now(),
        }
    }
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP server on the given port.
pub async fn start_server(state: AppState, port: u16) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server listening on http://0.0.0.0:{}", port);

    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
