//! Fourd Hub - local rig controller.
//!
//! Connects to the cloud relay as this rig's device socket, schedules
//! timeline effects against the playhead, and publishes the resulting
//! commands on the local actuator bus. Configuration comes from the
//! environment (see `HubConfig`); a missing required variable is a
//! startup failure.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fourd_core::constants::SHUTDOWN_GRACE_SECS;
use fourd_core::hub::{status, ws_client};
use fourd_core::{HubConfig, LocalHub, LoopbackBus};
use tokio::signal;

/// Fourd Hub - drives one rig's actuators from cloud playhead traffic.
#[derive(Parser, Debug)]
#[command(name = "fourd-hub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "FOURD_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Fourd Hub v{}", env!("CARGO_PKG_VERSION"));

    // Missing required variables surface here with a non-zero exit
    let config = HubConfig::from_env().context("Failed to load configuration")?;
    log::info!(
        "Configuration: hub_id={}, cloud={}, bus={}:{}",
        config.device_hub_id,
        config.cloud_ws_url,
        config.bus_host,
        config.bus_port
    );

    // The concrete bus binding is a deployment collaborator. The stock
    // binary ships the in-process loopback, which logs every command;
    // broker-backed deployments swap in their own transport here.
    let transport = Arc::new(LoopbackBus::new());
    let hub = Arc::new(LocalHub::new(config, transport));
    hub.start().await.context("Failed to start hub")?;

    let status_handle = tokio::spawn({
        let hub = hub.clone();
        async move {
            if let Err(e) = status::serve(hub).await {
                log::error!("Status endpoint error: {}", e);
            }
        }
    });

    let client_handle = tokio::spawn({
        let hub = hub.clone();
        async move { ws_client::run(hub).await }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    // Publishes stop-all before the bus disconnects
    hub.shutdown().await;
    let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
    if tokio::time::timeout(grace, client_handle).await.is_err() {
        log::warn!("Cloud client did not stop within {:?}", grace);
    }
    status_handle.abort();

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
