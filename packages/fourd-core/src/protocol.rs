//! WebSocket message vocabulary shared by the cloud edge and the hub.
//!
//! Every frame is a single JSON object with a string `type`
//! discriminant. Unknown fields are ignored; an unknown `type`
//! deserializes to [`WsMessage::Unknown`] and is handled as
//! warn-and-drop by both sides.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FourdError, FourdResult};
use crate::timeline::TimelineDoc;

// ─────────────────────────────────────────────────────────────────────────────
// Roles and Player State
// ─────────────────────────────────────────────────────────────────────────────

/// Connection role, taken from the upgrade path `/ws/{role}/{session_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Playhead source (the browser player).
    Webapp,
    /// A local hub driving actuators.
    Device,
    /// Optional preparation controller UI.
    Preparation,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webapp => "webapp",
            Self::Device => "device",
            Self::Preparation => "preparation",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FourdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webapp" => Ok(Self::Webapp),
            "device" => Ok(Self::Device),
            "preparation" => Ok(Self::Preparation),
            other => Err(FourdError::InvalidRequest(format!(
                "unknown role: {}",
                other
            ))),
        }
    }
}

/// Player state carried by `video_sync` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoState {
    Play,
    Pause,
    Seeking,
    Seeked,
    Stop,
}

/// Commands carried by `control` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    StartPlayback,
    StopPlayback,
    Reset,
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata attached to a bulk timeline transmission. Informational;
/// the receiver trusts `sync_data`, not the metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransmissionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub events_count: u64,
    #[serde(default)]
    pub file_size_kb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// The full frame vocabulary, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Server → client, immediately after a successful upgrade.
    ConnectionEstablished {
        connection_id: String,
        session_id: String,
        /// ISO-8601 UTC.
        server_time: String,
    },

    /// Full timeline push: webapp → server → every device socket.
    SyncDataBulkTransmission {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transmission_metadata: Option<TransmissionMetadata>,
        sync_data: TimelineDoc,
    },

    /// Periodic playhead report from the webapp.
    VideoSync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        video_time: f64,
        video_state: VideoState,
        #[serde(default)]
        video_duration: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_timestamp: Option<String>,
    },

    /// Server → webapp acknowledgement of a `video_sync`.
    SyncAck {
        received_time: f64,
        received_state: VideoState,
        /// ISO-8601 UTC.
        server_time: String,
        relayed_to_devices: bool,
    },

    /// Playback control: webapp/preparation → devices.
    Control {
        command: ControlCommand,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        params: serde_json::Value,
    },

    /// Probe request: webapp/preparation → devices.
    DeviceTest {
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        params: serde_json::Value,
    },

    /// Probe reply: device → the probing socket.
    DeviceTestResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(default)]
        result: serde_json::Value,
    },

    /// Emergency stop, accepted from any role and fanned out to all.
    StopSignal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default = "default_stop_action")]
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        /// Epoch seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },

    /// Device → companion webapp/preparation sockets.
    DeviceStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(default)]
        status: serde_json::Value,
    },

    /// Device → companion webapp/preparation sockets.
    DeviceConnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Device → companion webapp/preparation sockets.
    DeviceAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_type: Option<String>,
    },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_time: Option<String>,
    },

    /// Legacy playhead frame; equivalent to a stateless `video_sync`.
    Sync {
        #[serde(rename = "currentTime")]
        current_time: f64,
    },

    /// Error report to the originating socket.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Catch-all for unrecognized `type` values: warn and drop.
    #[serde(other)]
    Unknown,
}

fn default_stop_action() -> String {
    "stop_all".to_string()
}

impl WsMessage {
    /// Parses one text frame.
    pub fn parse(raw: &str) -> FourdResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| FourdError::InvalidRequest(format!("malformed frame: {}", e)))
    }

    /// Serializes for the wire.
    pub fn to_json(&self) -> String {
        // The vocabulary contains no non-serializable values
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("[Protocol] serialize failed: {}", e);
            String::from("{\"type\":\"error\",\"message\":\"serialization failure\"}")
        })
    }

    /// Discriminant string, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::SyncDataBulkTransmission { .. } => "sync_data_bulk_transmission",
            Self::VideoSync { .. } => "video_sync",
            Self::SyncAck { .. } => "sync_ack",
            Self::Control { .. } => "control",
            Self::DeviceTest { .. } => "device_test",
            Self::DeviceTestResult { .. } => "device_test_result",
            Self::StopSignal { .. } => "stop_signal",
            Self::DeviceStatus { .. } => "device_status",
            Self::DeviceConnected { .. } => "device_connected",
            Self::DeviceAck { .. } => "device_ack",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Sync { .. } => "sync",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_from_path_segment() {
        assert_eq!("webapp".parse::<Role>().unwrap(), Role::Webapp);
        assert_eq!("device".parse::<Role>().unwrap(), Role::Device);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn video_sync_round_trips() {
        let raw = r#"{"type":"video_sync","session_id":"s1","video_time":12.5,
                      "video_state":"play","video_duration":120.0}"#;
        let msg = WsMessage::parse(raw).unwrap();
        match &msg {
            WsMessage::VideoSync {
                video_time,
                video_state,
                ..
            } => {
                assert_eq!(*video_time, 12.5);
                assert_eq!(*video_state, VideoState::Play);
            }
            other => panic!("wrong variant: {:?}", other),
        }
        let reparsed = WsMessage::parse(&msg.to_json()).unwrap();
        assert_eq!(reparsed, msg);
    }

    #[test]
    fn bulk_transmission_carries_timeline() {
        let raw = r#"{
            "type":"sync_data_bulk_transmission",
            "session_id":"s1","video_id":"v1",
            "transmission_metadata":{"video_id":"v1","total_duration":120.0,
                "events_count":2,"file_size_kb":0.4,
                "transmission_timestamp":"2026-01-01T00:00:00Z",
                "checksum":"abc","format":"timeline_json"},
            "sync_data":{"events":[
                {"t":0,"action":"caption","text":"..."},
                {"t":5.0,"effect":"wind","mode":"burst","action":"start"}
            ]}
        }"#;
        match WsMessage::parse(raw).unwrap() {
            WsMessage::SyncDataBulkTransmission {
                sync_data,
                transmission_metadata,
                ..
            } => {
                assert_eq!(sync_data.events.len(), 2);
                assert_eq!(transmission_metadata.unwrap().events_count, 2);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn stop_signal_action_defaults_to_stop_all() {
        match WsMessage::parse(r#"{"type":"stop_signal"}"#).unwrap() {
            WsMessage::StopSignal { action, .. } => assert_eq!(action, "stop_all"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_catch_all() {
        let msg = WsMessage::parse(r#"{"type":"telemetry_v2","payload":1}"#).unwrap();
        assert_eq!(msg, WsMessage::Unknown);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = WsMessage::parse(r#"{"type":"ping","timestamp":1.0,"extra":"x"}"#).unwrap();
        assert_eq!(msg.kind(), "ping");
    }

    #[test]
    fn legacy_sync_uses_camel_case_time() {
        match WsMessage::parse(r#"{"type":"sync","currentTime":42.0}"#).unwrap() {
            WsMessage::Sync { current_time } => assert_eq!(current_time, 42.0),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn missing_frames_fail_parse() {
        assert!(WsMessage::parse("not json").is_err());
        // video_sync without required fields
        assert!(WsMessage::parse(r#"{"type":"video_sync"}"#).is_err());
    }
}
