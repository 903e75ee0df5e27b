//! Fixed protocol constants that should NOT be changed.
//!
//! Bus topic names and payload vocabulary are defined by the actuator
//! firmware; changing them breaks every deployed rig. Tunable values
//! (cooldowns, timeouts) live in [`crate::config`] instead.

// ─────────────────────────────────────────────────────────────────────────────
// Local Bus Topics
// ─────────────────────────────────────────────────────────────────────────────

/// Water cannon trigger topic. Payload: `trigger`.
pub const TOPIC_WATER: &str = "/4dx/water";

/// Wind fan topic. Payloads: `ON`, `OFF`.
pub const TOPIC_WIND: &str = "/4dx/wind";

/// Flash light topic. Payloads: `ON`, `OFF`, `BLINK_SLOW`, `BLINK_FAST`.
pub const TOPIC_LIGHT: &str = "/4dx/light";

/// Ambient color LED topic. Payloads: uppercased color names.
pub const TOPIC_COLOR: &str = "/4dx/color";

/// Seat motor 1 (lower region) control topic.
pub const TOPIC_MOTOR1: &str = "/4dx/motor1/control";

/// Seat motor 2 (upper region) control topic.
pub const TOPIC_MOTOR2: &str = "/4dx/motor2/control";

/// Inbound heartbeat topic. Payload is the sending device's id.
pub const TOPIC_HEARTBEAT: &str = "/4dx/heartbeat";

/// Baseline color the LEDs return to on stop.
///
/// Deliberately `RED` rather than `OFF` so the LEDs always have a
/// defined state.
pub const COLOR_BASELINE: &str = "RED";

// ─────────────────────────────────────────────────────────────────────────────
// Wire Limits
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum JSON-serialized size of a bulk timeline transmission (bytes).
pub const MAX_BULK_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// WebSocket close code for an unknown session on upgrade.
pub const CLOSE_SESSION_NOT_FOUND: u16 = 4004;

// ─────────────────────────────────────────────────────────────────────────────
// Channels and Queues
// ─────────────────────────────────────────────────────────────────────────────

/// Per-connection outbound send queue depth. A full queue drops the
/// frame for that receiver only (the next playhead tick replaces it).
pub const SEND_QUEUE_CAPACITY: usize = 64;

/// Capacity of the internal stop-signal broadcast channel.
pub const STOP_SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the loopback bus broadcast channel.
pub const BUS_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Default Timings
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot catch window, realized by ingress tick rate (ms).
pub const DEFAULT_SYNC_TOLERANCE_MS: u64 = 100;

/// Bus peer heartbeat send interval (seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Bus peer heartbeat timeout before a device is marked offline (seconds).
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 15;

/// Cloud WebSocket reconnect delay (seconds).
pub const DEFAULT_WS_RECONNECT_DELAY_SECS: u64 = 5;

/// Cloud WebSocket application-level ping interval (seconds).
pub const DEFAULT_WS_PING_INTERVAL_SECS: u64 = 30;

/// WebSocket write deadline (seconds); a timeout counts as a broken
/// connection.
pub const WS_WRITE_DEADLINE_SECS: u64 = 5;

/// Idle-read timeout on the cloud socket without a pong (seconds).
pub const WS_IDLE_READ_TIMEOUT_SECS: u64 = 90;

/// Dormant session retention before cleanup (seconds). 24 hours.
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Interval between dormant-session cleanup sweeps (seconds).
pub const SESSION_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Shutdown grace period for task teardown (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Number of cached timeline files kept per hub.
pub const DEFAULT_TIMELINE_CACHE_KEEP: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Default Cooldowns
// ─────────────────────────────────────────────────────────────────────────────

/// Water cooldown (seconds). The pump needs time to repressurize.
pub const DEFAULT_WATER_COOLDOWN_SECS: f64 = 3.0;

/// Wind cooldown (seconds).
pub const DEFAULT_WIND_COOLDOWN_SECS: f64 = 1.0;

/// Vibration cooldown (seconds).
pub const DEFAULT_VIBRATION_COOLDOWN_SECS: f64 = 0.5;

/// Color cooldown (seconds).
pub const DEFAULT_COLOR_COOLDOWN_SECS: f64 = 0.2;

/// Flash cooldown (seconds). No cooldown.
pub const DEFAULT_FLASH_COOLDOWN_SECS: f64 = 0.0;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the /health endpoints.
pub const SERVICE_ID: &str = "fourd-home";
