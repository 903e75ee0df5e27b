//! The local hub: one rig's long-running controller process.
//!
//! Composes the bus dispatcher, device registry, timeline scheduler,
//! and timeline cache, and turns inbound cloud frames into scheduler
//! and bus activity. The cloud client loop lives in [`ws_client`]; the
//! operator status endpoint in [`status`].

pub mod status;
pub mod ws_client;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusDispatcher, BusTransport, DeviceRegistry};
use crate::config::HubConfig;
use crate::effects::EffectMapper;
use crate::error::FourdResult;
use crate::protocol::{ControlCommand, VideoState, WsMessage};
use crate::timeline::{MappedBusSink, Timeline, TimelineCache, TimelineScheduler};
use crate::utils::now_iso;

/// One rig's controller: scheduler, bus, registry, and cache wired
/// together behind a single message entry point.
pub struct LocalHub {
    config: HubConfig,
    dispatcher: Arc<BusDispatcher>,
    scheduler: Arc<TimelineScheduler>,
    registry: Arc<DeviceRegistry>,
    cache: Option<TimelineCache>,
    cancel: CancellationToken,
}

impl LocalHub {
    /// Wires the hub components. The bus transport is a collaborator:
    /// production deployments bind their broker client, tests and
    /// dry runs pass a loopback.
    pub fn new(config: HubConfig, transport: Arc<dyn BusTransport>) -> Self {
        let dispatcher = Arc::new(BusDispatcher::new(transport));
        let scheduler = Arc::new(TimelineScheduler::with_cooldowns(
            Arc::new(MappedBusSink::new(dispatcher.clone())),
            config.cooldown_table(),
        ));
        let registry = Arc::new(DeviceRegistry::new(config.heartbeat_timeout));

        let cache = match TimelineCache::new(&config.timeline_cache_dir, config.timeline_cache_keep)
        {
            Ok(cache) => Some(cache),
            Err(e) => {
                log::warn!("[Hub] timeline cache unavailable: {}", e);
                None
            }
        };

        Self {
            config,
            dispatcher,
            scheduler,
            registry,
            cache,
            cancel: CancellationToken::new(),
        }
    }

    /// Connects the bus, starts heartbeat observation and the registry
    /// sweep, and reloads the newest cached timeline if one exists.
    pub async fn start(&self) -> FourdResult<()> {
        if let Err(e) = self.dispatcher.connect().await {
            // The bus being down must not take the cloud path with it
            log::warn!("[Hub] bus connect failed, continuing without: {}", e);
        }

        let registry = self.registry.clone();
        self.dispatcher
            .subscribe_heartbeat(Arc::new(move |device_id| {
                registry.record_heartbeat(device_id);
            }));
        self.registry
            .spawn_sweeper(self.config.heartbeat_interval, self.cancel.clone());

        if let Some(cache) = &self.cache {
            if let Some(doc) = cache.load_latest(&self.config.device_hub_id) {
                match Timeline::from_doc(doc) {
                    Ok(timeline) => {
                        log::info!(
                            "[Hub] restored cached timeline ({} events)",
                            timeline.len()
                        );
                        self.scheduler.load_timeline(timeline);
                    }
                    Err(e) => log::warn!("[Hub] cached timeline rejected: {}", e),
                }
            }
        }

        Ok(())
    }

    /// Handles one frame from the cloud socket, returning an optional
    /// reply frame.
    pub fn handle_message(&self, message: &WsMessage) -> Option<WsMessage> {
        match message {
            WsMessage::SyncDataBulkTransmission { sync_data, .. } => {
                match Timeline::from_doc(sync_data.clone()) {
                    Ok(timeline) => {
                        log::info!("[Hub] timeline received ({} events)", timeline.len());
                        if let Some(cache) = &self.cache {
                            // Keyed by this hub's id, not the frame's
                            // session id, so restart reload finds it
                            if let Err(e) = cache.save(&self.config.device_hub_id, sync_data) {
                                log::warn!("[Hub] timeline cache write failed: {}", e);
                            }
                        }
                        self.scheduler.load_timeline(timeline);
                    }
                    // The previously loaded timeline stays in place
                    Err(e) => log::warn!("[Hub] timeline rejected: {}", e),
                }
                None
            }

            WsMessage::VideoSync {
                video_time,
                video_state,
                ..
            } => {
                if *video_state == VideoState::Play {
                    self.scheduler.start_playback();
                }
                self.scheduler.update_time(*video_time, Some(*video_state));
                None
            }

            WsMessage::Sync { current_time } => {
                self.scheduler.update_time(*current_time, None);
                None
            }

            WsMessage::Control { command, .. } => {
                match command {
                    ControlCommand::StartPlayback => self.scheduler.start_playback(),
                    ControlCommand::StopPlayback => self.scheduler.stop_playback(),
                    ControlCommand::Reset => self.scheduler.reset(),
                }
                None
            }

            WsMessage::DeviceTest { .. } => Some(WsMessage::DeviceTestResult {
                device_id: Some(self.config.device_hub_id.clone()),
                result: json!({
                    "bus_connected": self.dispatcher.connected(),
                    "devices": self.registry.summary(),
                    "scheduler": self.scheduler.stats(),
                    "tested_at": now_iso(),
                }),
            }),

            WsMessage::StopSignal { source, .. } => {
                log::info!(
                    "[Hub] stop signal received (source: {})",
                    source.as_deref().unwrap_or("unknown")
                );
                self.stop_all();
                None
            }

            WsMessage::ConnectionEstablished { connection_id, .. } => {
                log::info!("[Hub] cloud connection established: {}", connection_id);
                None
            }

            WsMessage::Pong { .. }
            | WsMessage::SyncAck { .. }
            | WsMessage::DeviceAck { .. }
            | WsMessage::DeviceConnected { .. }
            | WsMessage::Ping { .. } => {
                log::debug!("[Hub] observed {} frame", message.kind());
                None
            }

            WsMessage::Unknown => {
                log::warn!("[Hub] unknown frame type, dropped");
                None
            }

            other => {
                log::debug!("[Hub] ignoring {} frame", other.kind());
                None
            }
        }
    }

    /// Stops playback and returns every actuator to quiescent state.
    /// Idempotent: a second call publishes a second stop-all set but
    /// leaves no stuck state behind.
    pub fn stop_all(&self) {
        self.scheduler.stop_playback();
        self.dispatcher
            .publish_all(&EffectMapper::stop_all_commands());
    }

    /// Operator-facing snapshot for the status endpoint.
    pub fn status_snapshot(&self) -> serde_json::Value {
        json!({
            "hub_id": self.config.device_hub_id,
            "bus_connected": self.dispatcher.connected(),
            "devices": self.registry.all_devices(),
            "device_summary": self.registry.summary(),
            "scheduler": self.scheduler.stats(),
            "upcoming_events": self.scheduler.upcoming_events(10.0),
            "server_time": now_iso(),
        })
    }

    /// Cancels hub tasks and publishes the stop-all sequence so no
    /// actuator is left running across a shutdown.
    pub async fn shutdown(&self) {
        log::info!("[Hub] shutting down");
        self.cancel.cancel();
        self.stop_all();
        self.dispatcher.disconnect().await;
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scheduler(&self) -> &Arc<TimelineScheduler> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Arc<BusDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }
}
