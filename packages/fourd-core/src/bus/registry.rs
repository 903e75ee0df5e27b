//! Bus peer registry: heartbeat tracking and online/offline state.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::utils::now_epoch_secs;

/// Closed id→type table for known actuator controllers.
///
/// Unknown ids are still tracked, with type `unknown`.
fn infer_device_type(device_id: &str) -> &'static str {
    match device_id {
        // Legacy firmware ids (kept for backward compatibility)
        "ESP_WATER_WIND" => "water_wind",
        "ESP_LED" => "led",
        "ESP_MOTOR1" => "motor1",
        "ESP_MOTOR2" => "motor2",
        // Current firmware ids
        "alive_esp1_water" => "water_wind",
        "alive_esp2_led" => "led",
        "alive_esp3_motor1" => "motor1",
        "alive_esp4_motor2" => "motor2",
        // Bare keepalive message
        "alive" => "heartbeat",
        _ => "unknown",
    }
}

/// Status of one bus peer.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub device_type: &'static str,
    pub is_online: bool,
    /// Epoch seconds of the last heartbeat.
    pub last_heartbeat: f64,
    /// Epoch seconds the device was first seen.
    pub first_seen: f64,
}

/// Aggregate view used by device tests and the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub total_devices: usize,
    pub online_devices: usize,
    pub offline_devices: usize,
}

/// Table of bus peers keyed by device id.
///
/// Peers announce themselves with periodic heartbeats; a peer that
/// misses heartbeats beyond the timeout is marked offline by the sweep
/// task but stays in the table.
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceStatus>,
    heartbeat_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            devices: DashMap::new(),
            heartbeat_timeout,
        }
    }

    /// Records a heartbeat, registering the device on first sight.
    pub fn record_heartbeat(&self, device_id: &str) {
        let now = now_epoch_secs();

        if let Some(mut device) = self.devices.get_mut(device_id) {
            device.last_heartbeat = now;
            if !device.is_online {
                log::info!("[Registry] device back online: {}", device_id);
                device.is_online = true;
            }
            return;
        }

        let device_type = infer_device_type(device_id);
        log::info!("[Registry] new device: {} ({})", device_id, device_type);
        self.devices.insert(
            device_id.to_string(),
            DeviceStatus {
                device_id: device_id.to_string(),
                device_type,
                is_online: true,
                last_heartbeat: now,
                first_seen: now,
            },
        );
    }

    /// Marks devices offline whose last heartbeat is older than the
    /// timeout. Called periodically by the sweep task.
    pub fn sweep(&self) {
        let now = now_epoch_secs();
        let timeout = self.heartbeat_timeout.as_secs_f64();

        for mut device in self.devices.iter_mut() {
            if device.is_online && now - device.last_heartbeat > timeout {
                log::warn!(
                    "[Registry] device timeout: {} (last heartbeat {:.1}s ago)",
                    device.device_id,
                    now - device.last_heartbeat
                );
                device.is_online = false;
            }
        }
    }

    /// Spawns the periodic offline sweep, cancelled via the token.
    pub fn spawn_sweeper(
        self: &std::sync::Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => registry.sweep(),
                }
            }
        })
    }

    pub fn all_devices(&self) -> Vec<DeviceStatus> {
        self.devices.iter().map(|d| d.clone()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_online).count()
    }

    pub fn summary(&self) -> DeviceSummary {
        let total = self.devices.len();
        let online = self.online_count();
        DeviceSummary {
            total_devices: total,
            online_devices: online,
            offline_devices: total - online,
        }
    }
}
