//! Cloud edge configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use fourd_core::constants::DEFAULT_SESSION_IDLE_TIMEOUT_SECS;
use serde::Deserialize;

/// Cloud edge configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Port to bind the HTTP/WebSocket server to.
    /// Override: `FOURD_BIND_PORT`
    pub bind_port: u16,

    /// Hours a dormant session (zero sockets) is retained before the
    /// cleanup sweep removes it.
    /// Override: `FOURD_SESSION_IDLE_HOURS`
    pub session_idle_hours: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            bind_port: 8080,
            session_idle_hours: DEFAULT_SESSION_IDLE_TIMEOUT_SECS / (60 * 60),
        }
    }
}

impl CloudConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FOURD_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("FOURD_SESSION_IDLE_HOURS") {
            if let Ok(hours) = val.parse() {
                self.session_idle_hours = hours;
            }
        }
    }

    pub fn dormant_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_hours * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CloudConfig::default();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(
            config.dormant_timeout(),
            Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS)
        );
    }
}
