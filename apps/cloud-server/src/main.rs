//! Fourd Cloud - session relay for the 4D home rig pipeline.
//!
//! Accepts WebSocket upgrades from webapps, hubs, and preparation
//! controllers, and fans playhead, timeline, and stop traffic out
//! within each session. Stateless apart from in-memory sessions; run
//! it behind any TLS terminator.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fourd_core::{start_server, AppState, SessionRouter};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::CloudConfig;

/// Fourd Cloud - session relay between video players and rig hubs.
#[derive(Parser, Debug)]
#[command(name = "fourd-cloud")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "FOURD_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "FOURD_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Fourd Cloud v{}", env!("CARGO_PKG_VERSION"));

    let mut config = CloudConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    log::info!(
        "Configuration: bind_port={}, session_idle_hours={}",
        config.bind_port,
        config.session_idle_hours
    );

    let router = Arc::new(SessionRouter::new(config.dormant_timeout()));
    let cancel = CancellationToken::new();
    let cleanup_task = router.spawn_cleanup(cancel.clone());

    let app_state = AppState::builder().router(router).build();

    let bind_port = config.bind_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, bind_port).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    cancel.cancel();
    let _ = cleanup_task.await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
