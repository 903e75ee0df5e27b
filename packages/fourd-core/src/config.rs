//! Hub configuration from the environment.
//!
//! Deployments run the hub under a process supervisor; configuration
//! arrives as environment variables. Missing required variables are a
//! startup failure with a non-zero exit, everything else has defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_COLOR_COOLDOWN_SECS, DEFAULT_FLASH_COOLDOWN_SECS, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_SYNC_TOLERANCE_MS, DEFAULT_TIMELINE_CACHE_KEEP,
    DEFAULT_VIBRATION_COOLDOWN_SECS, DEFAULT_WATER_COOLDOWN_SECS, DEFAULT_WIND_COOLDOWN_SECS,
    DEFAULT_WS_PING_INTERVAL_SECS, DEFAULT_WS_RECONNECT_DELAY_SECS,
};
use crate::error::{FourdError, FourdResult};
use crate::timeline::CooldownTable;
use crate::timeline::Effect;

/// Everything the hub binary needs to run.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Cloud edge base URL, e.g. `wss://cloud.example.com`.
    pub cloud_ws_url: String,
    /// This hub's session id on the cloud edge.
    pub device_hub_id: String,
    pub bus_host: String,
    pub bus_port: u16,
    pub sync_tolerance: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub ws_reconnect_delay: Duration,
    pub ws_ping_interval: Duration,
    pub timeline_cache_dir: PathBuf,
    pub timeline_cache_keep: usize,
    pub water_cooldown_secs: f64,
    pub wind_cooldown_secs: f64,
    pub vibration_cooldown_secs: f64,
    pub color_cooldown_secs: f64,
    pub status_port: u16,
}

impl HubConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> FourdResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary lookup, for tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> FourdResult<Self> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| {
                FourdError::Configuration(format!("missing required variable {}", key))
            })
        };

        Ok(Self {
            cloud_ws_url: required("CLOUD_WS_URL")?,
            device_hub_id: required("DEVICE_HUB_ID")?,
            bus_host: lookup("BUS_HOST").unwrap_or_else(|| "localhost".to_string()),
            bus_port: parse_or(&lookup, "BUS_PORT", 1883)?,
            sync_tolerance: Duration::from_millis(parse_or(
                &lookup,
                "SYNC_TOLERANCE_MS",
                DEFAULT_SYNC_TOLERANCE_MS,
            )?),
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "HEARTBEAT_INTERVAL_SEC",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )?),
            heartbeat_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HEARTBEAT_TIMEOUT_SEC",
                DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            )?),
            ws_reconnect_delay: Duration::from_secs(parse_or(
                &lookup,
                "WS_RECONNECT_DELAY_SEC",
                DEFAULT_WS_RECONNECT_DELAY_SECS,
            )?),
            ws_ping_interval: Duration::from_secs(parse_or(
                &lookup,
                "WS_PING_INTERVAL_SEC",
                DEFAULT_WS_PING_INTERVAL_SECS,
            )?),
            timeline_cache_dir: lookup("TIMELINE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("fourd-timeline-cache")),
            timeline_cache_keep: parse_or(
                &lookup,
                "TIMELINE_CACHE_KEEP",
                DEFAULT_TIMELINE_CACHE_KEEP,
            )?,
            water_cooldown_secs: parse_or(
                &lookup,
                "WATER_COOLDOWN_SEC",
                DEFAULT_WATER_COOLDOWN_SECS,
            )?,
            wind_cooldown_secs: parse_or(&lookup, "WIND_COOLDOWN_SEC", DEFAULT_WIND_COOLDOWN_SECS)?,
            vibration_cooldown_secs: parse_or(
                &lookup,
                "VIBRATION_COOLDOWN_SEC",
                DEFAULT_VIBRATION_COOLDOWN_SECS,
            )?,
            color_cooldown_secs: parse_or(
                &lookup,
                "COLOR_COOLDOWN_SEC",
                DEFAULT_COLOR_COOLDOWN_SECS,
            )?,
            status_port: parse_or(&lookup, "STATUS_PORT", 8090)?,
        })
    }

    /// The per-effect cooldown table this configuration describes.
    pub fn cooldown_table(&self) -> CooldownTable {
        CooldownTable::new(HashMap::from([
            (Effect::Water, self.water_cooldown_secs),
            (Effect::Wind, self.wind_cooldown_secs),
            (Effect::Vibration, self.vibration_cooldown_secs),
            (Effect::Color, self.color_cooldown_secs),
            (Effect::Flash, DEFAULT_FLASH_COOLDOWN_SECS),
        ]))
    }

    /// The cloud session endpoint for this hub's device socket.
    pub fn device_endpoint(&self) -> String {
        format!(
            "{}/ws/device/{}",
            self.cloud_ws_url.trim_end_matches('/'),
            self.device_hub_id
        )
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> FourdResult<T> {
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|_| {
            FourdError::Configuration(format!("invalid value for {}: {:?}", key, raw))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env(key: &str) -> Option<String> {
        match key {
            "CLOUD_WS_URL" => Some("wss://cloud.example.com/".to_string()),
            "DEVICE_HUB_ID" => Some("hub-1".to_string()),
            _ => None,
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = HubConfig::from_lookup(base_env).unwrap();
        assert_eq!(config.bus_port, 1883);
        assert_eq!(config.sync_tolerance, Duration::from_millis(100));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(config.water_cooldown_secs, 3.0);
    }

    #[test]
    fn missing_required_variable_is_a_configuration_error() {
        let err = HubConfig::from_lookup(|_| None).unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn invalid_number_is_a_configuration_error() {
        let err = HubConfig::from_lookup(|key| match key {
            "BUS_PORT" => Some("not-a-port".to_string()),
            other => base_env(other),
        })
        .unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn device_endpoint_joins_without_double_slash() {
        let config = HubConfig::from_lookup(base_env).unwrap();
        assert_eq!(
            config.device_endpoint(),
            "wss://cloud.example.com/ws/device/hub-1"
        );
    }

    #[test]
    fn cooldown_overrides_parse_as_floats() {
        let config = HubConfig::from_lookup(|key| match key {
            "WATER_COOLDOWN_SEC" => Some("1.5".to_string()),
            other => base_env(other),
        })
        .unwrap();
        assert_eq!(config.water_cooldown_secs, 1.5);
    }
}
