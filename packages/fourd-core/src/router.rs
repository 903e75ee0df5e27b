//! Session registry and per-session message routing.
//!
//! Sockets register under `(session_id, role)`; inbound frames are
//! routed by type with role validation. Fan-out snapshots the receiver
//! list, then pushes into per-connection bounded send queues: a full
//! queue drops the frame for that receiver only, since the next
//! playhead tick replaces it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::constants::{
    MAX_BULK_PAYLOAD_BYTES, SEND_QUEUE_CAPACITY, SESSION_CLEANUP_INTERVAL_SECS,
    STOP_SIGNAL_CHANNEL_CAPACITY,
};
use crate::error::FourdError;
use crate::protocol::{Role, VideoState, WsMessage};
use crate::utils::now_iso;

// ─────────────────────────────────────────────────────────────────────────────
// Session State
// ─────────────────────────────────────────────────────────────────────────────

/// Last playhead seen on a session.
#[derive(Debug, Clone, Serialize)]
pub struct Playhead {
    pub t: f64,
    pub state: VideoState,
    pub duration: f64,
    /// ISO-8601 UTC at receipt.
    pub wall_clock: String,
}

struct ConnectionHandle {
    id: String,
    role: Role,
    tx: mpsc::Sender<Arc<str>>,
}

struct Session {
    connections: Vec<ConnectionHandle>,
    /// Latest bulk timeline payload, replayed to late device joins.
    cached_bulk: Option<Arc<str>>,
    last_playhead: Option<Playhead>,
    /// Set when the last socket disconnects; cleared on the next join.
    dormant_since: Option<Instant>,
    created_at: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            connections: Vec::new(),
            cached_bulk: None,
            last_playhead: None,
            dormant_since: None,
            created_at: Instant::now(),
        }
    }

    fn count_role(&self, role: Role) -> usize {
        self.connections.iter().filter(|c| c.role == role).count()
    }
}

/// Summary of one session for the REST listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub webapp_connections: usize,
    pub device_connections: usize,
    pub preparation_connections: usize,
    pub has_cached_timeline: bool,
    pub last_playhead: Option<Playhead>,
    pub age_secs: u64,
}

/// Stop signal surfaced to server-internal listeners.
#[derive(Debug, Clone)]
pub struct StopEvent {
    pub session_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Per-session fan-out router.
///
/// Sessions are created implicitly on the first register for an id and
/// removed after the dormant timeout or an explicit delete. A dormant
/// session keeps its cached bulk payload so late device joins still
/// receive the timeline.
pub struct SessionRouter {
    sessions: DashMap<String, Session>,
    stop_tx: broadcast::Sender<StopEvent>,
    dormant_timeout: Duration,
    dropped_frames: AtomicU64,
}

impl SessionRouter {
    pub fn new(dormant_timeout: Duration) -> Self {
        let (stop_tx, _) = broadcast::channel(STOP_SIGNAL_CHANNEL_CAPACITY);
        Self {
            sessions: DashMap::new(),
            stop_tx,
            dormant_timeout,
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Registers a socket under `(session_id, role)`.
    ///
    /// Returns the deregistration guard and the receive side of the
    /// connection's send queue. A `connection_established` frame is
    /// queued immediately; a device joining a session with a cached
    /// bulk payload also receives that payload.
    pub fn register(
        self: &Arc<Self>,
        session_id: &str,
        role: Role,
    ) -> (ConnectionGuard, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let connection_id = Uuid::new_v4().to_string();

        let established = WsMessage::ConnectionEstablished {
            connection_id: connection_id.clone(),
            session_id: session_id.to_string(),
            server_time: now_iso(),
        }
        .to_json();

        {
            let mut session = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(Session::new);
            session.dormant_since = None;

            let _ = tx.try_send(Arc::from(established.as_str()));
            if role == Role::Device {
                if let Some(cached) = session.cached_bulk.clone() {
                    log::info!(
                        "[Router] replaying cached timeline to late device join in {}",
                        session_id
                    );
                    let _ = tx.try_send(cached);
                }
            }

            session.connections.push(ConnectionHandle {
                id: connection_id.clone(),
                role,
                tx,
            });
        }

        log::info!(
            "[Router] {} connected to session {} as {}",
            connection_id,
            session_id,
            role
        );

        let guard = ConnectionGuard {
            router: self.clone(),
            session_id: session_id.to_string(),
            connection_id,
            role,
        };
        (guard, rx)
    }

    /// Routes one inbound text frame from a registered socket.
    pub fn route(&self, session_id: &str, sender_id: &str, sender_role: Role, raw: &str) {
        let message = match WsMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[Router] unparseable frame from {}: {}", sender_id, e);
                self.send_error(session_id, sender_id, "malformed frame");
                return;
            }
        };

        match &message {
            WsMessage::SyncDataBulkTransmission { .. } => {
                if !self.require_role(session_id, sender_id, sender_role, &[Role::Webapp], &message)
                {
                    return;
                }
                if raw.len() > MAX_BULK_PAYLOAD_BYTES {
                    let err = FourdError::PayloadTooLarge(raw.len());
                    log::warn!("[Router] bulk payload from {} dropped: {}", sender_id, err);
                    self.send_fourd_error(session_id, sender_id, &err);
                    return;
                }
                let payload: Arc<str> = Arc::from(raw);
                if let Some(mut session) = self.sessions.get_mut(session_id) {
                    session.cached_bulk = Some(payload.clone());
                }
                let relayed = self.fan_out(session_id, sender_id, &[Role::Device], payload);
                log::info!(
                    "[Router] cached bulk timeline for {} and relayed to {} devices",
                    session_id,
                    relayed
                );
            }

            WsMessage::VideoSync {
                video_time,
                video_state,
                video_duration,
                ..
            } => {
                if !self.require_role(session_id, sender_id, sender_role, &[Role::Webapp], &message)
                {
                    return;
                }
                if let Some(mut session) = self.sessions.get_mut(session_id) {
                    session.last_playhead = Some(Playhead {
                        t: *video_time,
                        state: *video_state,
                        duration: *video_duration,
                        wall_clock: now_iso(),
                    });
                }
                let relayed =
                    self.fan_out(session_id, sender_id, &[Role::Device], Arc::from(raw));
                let ack = WsMessage::SyncAck {
                    received_time: *video_time,
                    received_state: *video_state,
                    server_time: now_iso(),
                    relayed_to_devices: relayed > 0,
                };
                self.send_to(session_id, sender_id, Arc::from(ack.to_json().as_str()));
            }

            WsMessage::Sync { .. } => {
                if !self.require_role(session_id, sender_id, sender_role, &[Role::Webapp], &message)
                {
                    return;
                }
                self.fan_out(session_id, sender_id, &[Role::Device], Arc::from(raw));
            }

            WsMessage::Control { .. } | WsMessage::DeviceTest { .. } => {
                let allowed = [Role::Webapp, Role::Preparation];
                if !self.require_role(session_id, sender_id, sender_role, &allowed, &message) {
                    return;
                }
                self.fan_out(session_id, sender_id, &[Role::Device], Arc::from(raw));
            }

            WsMessage::StopSignal { .. } => {
                // Any role; everyone in the session hears it, sender included
                self.fan_out_all(session_id, Arc::from(raw));
                let _ = self.stop_tx.send(StopEvent {
                    session_id: session_id.to_string(),
                });
                log::info!("[Router] stop signal in session {} from {}", session_id, sender_id);
            }

            WsMessage::DeviceStatus { .. }
            | WsMessage::DeviceConnected { .. }
            | WsMessage::DeviceAck { .. }
            | WsMessage::DeviceTestResult { .. } => {
                if !self.require_role(session_id, sender_id, sender_role, &[Role::Device], &message)
                {
                    return;
                }
                self.fan_out(
                    session_id,
                    sender_id,
                    &[Role::Webapp, Role::Preparation],
                    Arc::from(raw),
                );
            }

            WsMessage::Ping { timestamp, .. } => {
                let pong = WsMessage::Pong {
                    timestamp: *timestamp,
                    server_time: Some(now_iso()),
                };
                self.send_to(session_id, sender_id, Arc::from(pong.to_json().as_str()));
            }

            WsMessage::Pong { .. } => {
                log::debug!("[Router] pong from {}", sender_id);
            }

            WsMessage::Unknown => {
                log::warn!("[Router] unknown frame type from {}, dropped", sender_id);
            }

            other => {
                // Server-originated types echoed back by a client
                log::debug!(
                    "[Router] ignoring {} frame from client {}",
                    other.kind(),
                    sender_id
                );
            }
        }
    }

    /// Server-internal stop-signal feed.
    pub fn subscribe_stop(&self) -> broadcast::Receiver<StopEvent> {
        self.stop_tx.subscribe()
    }

    /// Emits a stop signal into a session from outside a socket (the
    /// REST path). Returns false for an unknown session.
    pub fn broadcast_stop(&self, session_id: &str, source: &str) -> bool {
        if !self.session_exists(session_id) {
            return false;
        }
        let frame = WsMessage::StopSignal {
            session_id: Some(session_id.to_string()),
            action: "stop_all".to_string(),
            source: Some(source.to_string()),
            timestamp: Some(crate::utils::now_epoch_secs()),
        };
        self.fan_out_all(session_id, Arc::from(frame.to_json().as_str()));
        let _ = self.stop_tx.send(StopEvent {
            session_id: session_id.to_string(),
        });
        log::info!("[Router] stop signal in session {} from {}", session_id, source);
        true
    }

    /// Whether a session id currently exists (live or dormant).
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Creates a session explicitly (REST path); implicit creation on
    /// register also works.
    pub fn create_session(&self, session_id: &str) -> bool {
        match self.sessions.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Session::new());
                log::info!("[Router] session created: {}", session_id);
                true
            }
        }
    }

    /// Removes a session outright, dropping all its send queues.
    pub fn delete_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            log::info!("[Router] session deleted: {}", session_id);
        }
        removed
    }

    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|entry| SessionSummary {
                session_id: entry.key().clone(),
                webapp_connections: entry.count_role(Role::Webapp),
                device_connections: entry.count_role(Role::Device),
                preparation_connections: entry.count_role(Role::Preparation),
                has_cached_timeline: entry.cached_bulk.is_some(),
                last_playhead: entry.last_playhead.clone(),
                age_secs: entry.created_at.elapsed().as_secs(),
            })
            .collect()
    }

    /// Frames dropped due to full receiver queues.
    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Spawns the dormant-session sweep, cancelled via the token.
    pub fn spawn_cleanup(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(SESSION_CLEANUP_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => router.sweep_dormant(),
                }
            }
        })
    }

    /// Removes sessions that have been dormant beyond the timeout.
    pub fn sweep_dormant(&self) {
        let timeout = self.dormant_timeout;
        self.sessions.retain(|session_id, session| {
            let expired = session
                .dormant_since
                .is_some_and(|since| since.elapsed() > timeout);
            if expired {
                log::info!("[Router] dormant session expired: {}", session_id);
            }
            !expired
        });
    }

    // ─────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────

    fn require_role(
        &self,
        session_id: &str,
        sender_id: &str,
        sender_role: Role,
        allowed: &[Role],
        message: &WsMessage,
    ) -> bool {
        if allowed.contains(&sender_role) {
            return true;
        }
        log::warn!(
            "[Router] {} not accepted from role {} ({})",
            message.kind(),
            sender_role,
            sender_id
        );
        self.send_error(
            session_id,
            sender_id,
            &format!("{} not accepted from role {}", message.kind(), sender_role),
        );
        false
    }

    /// Queues `payload` to every connection with a role in `roles`,
    /// excluding the sender. Returns the number of receivers queued.
    fn fan_out(&self, session_id: &str, sender_id: &str, roles: &[Role], payload: Arc<str>) -> usize {
        let targets = self.snapshot(session_id, |c| {
            c.id != sender_id && roles.contains(&c.role)
        });
        self.deliver(&targets, payload)
    }

    /// Queues `payload` to every connection in the session, sender
    /// included.
    fn fan_out_all(&self, session_id: &str, payload: Arc<str>) -> usize {
        let targets = self.snapshot(session_id, |_| true);
        self.deliver(&targets, payload)
    }

    fn send_to(&self, session_id: &str, connection_id: &str, payload: Arc<str>) {
        let targets = self.snapshot(session_id, |c| c.id == connection_id);
        self.deliver(&targets, payload);
    }

    fn send_error(&self, session_id: &str, connection_id: &str, message: &str) {
        let frame = WsMessage::Error {
            message: message.to_string(),
            code: None,
        };
        self.send_to(session_id, connection_id, Arc::from(frame.to_json().as_str()));
    }

    /// Error frame carrying the machine-readable code.
    fn send_fourd_error(&self, session_id: &str, connection_id: &str, err: &FourdError) {
        let frame = WsMessage::Error {
            message: err.to_string(),
            code: Some(err.code().to_string()),
        };
        self.send_to(session_id, connection_id, Arc::from(frame.to_json().as_str()));
    }

    /// Snapshots matching senders under the map lock, releasing it
    /// before delivery.
    fn snapshot(
        &self,
        session_id: &str,
        keep: impl Fn(&ConnectionHandle) -> bool,
    ) -> Vec<(String, mpsc::Sender<Arc<str>>)> {
        match self.sessions.get(session_id) {
            Some(session) => session
                .connections
                .iter()
                .filter(|c| keep(c))
                .map(|c| (c.id.clone(), c.tx.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    fn deliver(&self, targets: &[(String, mpsc::Sender<Arc<str>>)], payload: Arc<str>) -> usize {
        let mut queued = 0;
        for (connection_id, tx) in targets {
            match tx.try_send(payload.clone()) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[Router] send queue full for {}, frame dropped", connection_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Connection is tearing down; its guard will deregister
                }
            }
        }
        queued
    }

    fn deregister(&self, session_id: &str, connection_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.connections.retain(|c| c.id != connection_id);
            if session.connections.is_empty() {
                // Dormant, not deleted: the cached bulk payload stays
                // available for late joins until the sweep expires it
                session.dormant_since = Some(Instant::now());
            }
        }
        log::info!("[Router] {} left session {}", connection_id, session_id);
    }
}

/// Deregisters its connection on drop, whatever the exit path.
pub struct ConnectionGuard {
    router: Arc<SessionRouter>,
    session_id: String,
    connection_id: String,
    role: Role,
}

impl ConnectionGuard {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.router.deregister(&self.session_id, &self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Arc<SessionRouter> {
        Arc::new(SessionRouter::new(Duration::from_secs(24 * 60 * 60)))
    }

    /// Drains everything currently queued for a connection.
    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<WsMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(WsMessage::parse(&frame).unwrap());
        }
        out
    }

    fn kinds(messages: &[WsMessage]) -> Vec<&'static str> {
        messages.iter().map(|m| m.kind()).collect()
    }

    const VIDEO_SYNC: &str =
        r#"{"type":"video_sync","video_time":3.5,"video_state":"play","video_duration":60.0}"#;
    const STOP: &str = r#"{"type":"stop_signal","action":"stop_all"}"#;
    const BULK: &str = r#"{"type":"sync_data_bulk_transmission","sync_data":{"events":[
        {"t":1.0,"effect":"water","mode":"burst","action":"shot"}]}}"#;

    #[tokio::test]
    async fn every_connection_gets_connection_established() {
        let router = router();
        let (guard, mut rx) = router.register("s1", Role::Webapp);
        let messages = drain(&mut rx);
        assert_eq!(kinds(&messages), vec!["connection_established"]);
        match &messages[0] {
            WsMessage::ConnectionEstablished { session_id, .. } => assert_eq!(session_id, "s1"),
            other => panic!("wrong frame: {:?}", other),
        }
        drop(guard);
    }

    #[tokio::test]
    async fn video_sync_fans_out_to_devices_and_acks_sender() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (_dev1, mut dev1_rx) = router.register("s1", Role::Device);
        let (_dev2, mut dev2_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);
        drain(&mut dev1_rx);
        drain(&mut dev2_rx);

        router.route("s1", webapp.connection_id(), Role::Webapp, VIDEO_SYNC);

        assert_eq!(kinds(&drain(&mut dev1_rx)), vec!["video_sync"]);
        assert_eq!(kinds(&drain(&mut dev2_rx)), vec!["video_sync"]);
        let acks = drain(&mut webapp_rx);
        match &acks[..] {
            [WsMessage::SyncAck {
                received_time,
                relayed_to_devices,
                ..
            }] => {
                assert_eq!(*received_time, 3.5);
                assert!(relayed_to_devices);
            }
            other => panic!("expected one sync_ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sync_ack_reports_no_devices() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        drain(&mut webapp_rx);

        router.route("s1", webapp.connection_id(), Role::Webapp, VIDEO_SYNC);
        match &drain(&mut webapp_rx)[..] {
            [WsMessage::SyncAck {
                relayed_to_devices, ..
            }] => assert!(!relayed_to_devices),
            other => panic!("expected one sync_ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_signal_reaches_every_socket_including_sender() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (_dev1, mut dev1_rx) = router.register("s1", Role::Device);
        let (_dev2, mut dev2_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);
        drain(&mut dev1_rx);
        drain(&mut dev2_rx);

        router.route("s1", webapp.connection_id(), Role::Webapp, STOP);

        assert_eq!(kinds(&drain(&mut webapp_rx)), vec!["stop_signal"]);
        assert_eq!(kinds(&drain(&mut dev1_rx)), vec!["stop_signal"]);
        assert_eq!(kinds(&drain(&mut dev2_rx)), vec!["stop_signal"]);
    }

    #[tokio::test]
    async fn stop_signal_notifies_internal_listeners() {
        let router = router();
        let mut stop_rx = router.subscribe_stop();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        drain(&mut webapp_rx);

        router.route("s1", webapp.connection_id(), Role::Webapp, STOP);
        assert_eq!(stop_rx.try_recv().unwrap().session_id, "s1");
    }

    #[tokio::test]
    async fn bulk_from_device_role_is_rejected() {
        let router = router();
        let (device, mut device_rx) = router.register("s1", Role::Device);
        drain(&mut device_rx);

        router.route("s1", device.connection_id(), Role::Device, BULK);
        assert_eq!(kinds(&drain(&mut device_rx)), vec!["error"]);
    }

    #[tokio::test]
    async fn late_device_join_receives_cached_bulk() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        drain(&mut webapp_rx);
        router.route("s1", webapp.connection_id(), Role::Webapp, BULK);

        let (_dev, mut dev_rx) = router.register("s1", Role::Device);
        assert_eq!(
            kinds(&drain(&mut dev_rx)),
            vec!["connection_established", "sync_data_bulk_transmission"]
        );
    }

    #[tokio::test]
    async fn cached_bulk_survives_dormancy() {
        let router = router();
        {
            let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
            drain(&mut webapp_rx);
            router.route("s1", webapp.connection_id(), Role::Webapp, BULK);
        }
        // All sockets gone; the session is dormant but alive
        assert!(router.session_exists("s1"));

        let (_dev, mut dev_rx) = router.register("s1", Role::Device);
        assert_eq!(
            kinds(&drain(&mut dev_rx)),
            vec!["connection_established", "sync_data_bulk_transmission"]
        );
    }

    #[tokio::test]
    async fn device_status_relays_to_companions_only() {
        let router = router();
        let (_webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (dev1, mut dev1_rx) = router.register("s1", Role::Device);
        let (_dev2, mut dev2_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);
        drain(&mut dev1_rx);
        drain(&mut dev2_rx);

        router.route(
            "s1",
            dev1.connection_id(),
            Role::Device,
            r#"{"type":"device_status","device_id":"hub-1","status":{"ok":true}}"#,
        );

        assert_eq!(kinds(&drain(&mut webapp_rx)), vec!["device_status"]);
        assert!(drain(&mut dev2_rx).is_empty());
    }

    #[tokio::test]
    async fn ping_gets_pong_directly() {
        let router = router();
        let (dev, mut dev_rx) = router.register("s1", Role::Device);
        drain(&mut dev_rx);

        router.route(
            "s1",
            dev.connection_id(),
            Role::Device,
            r#"{"type":"ping","timestamp":17.0}"#,
        );
        match &drain(&mut dev_rx)[..] {
            [WsMessage::Pong { timestamp, .. }] => assert_eq!(*timestamp, Some(17.0)),
            other => panic!("expected pong, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversize_bulk_is_dropped_with_error() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (_dev, mut dev_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);
        drain(&mut dev_rx);

        let padding = "x".repeat(MAX_BULK_PAYLOAD_BYTES);
        let oversize = format!(
            r#"{{"type":"sync_data_bulk_transmission","video_id":"{}","sync_data":{{"events":[]}}}}"#,
            padding
        );
        router.route("s1", webapp.connection_id(), Role::Webapp, &oversize);

        match &drain(&mut webapp_rx)[..] {
            [WsMessage::Error { code, .. }] => {
                assert_eq!(code.as_deref(), Some("payload_too_large"));
            }
            other => panic!("expected one error frame, got {:?}", other),
        }
        assert!(drain(&mut dev_rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_type_is_dropped_silently() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (_dev, mut dev_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);
        drain(&mut dev_rx);

        router.route(
            "s1",
            webapp.connection_id(),
            Role::Webapp,
            r#"{"type":"telemetry_v2"}"#,
        );
        assert!(drain(&mut webapp_rx).is_empty());
        assert!(drain(&mut dev_rx).is_empty());
    }

    #[tokio::test]
    async fn guard_drop_deregisters() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (dev, mut dev_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);
        drain(&mut dev_rx);
        drop(dev);

        router.route("s1", webapp.connection_id(), Role::Webapp, VIDEO_SYNC);
        match &drain(&mut webapp_rx)[..] {
            [WsMessage::SyncAck {
                relayed_to_devices, ..
            }] => assert!(!relayed_to_devices),
            other => panic!("expected sync_ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn full_queue_drops_frame_and_counts_it() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (_dev, _dev_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);

        // Never drain the device queue: overflow it
        for _ in 0..(SEND_QUEUE_CAPACITY + 8) {
            router.route("s1", webapp.connection_id(), Role::Webapp, VIDEO_SYNC);
        }
        assert!(router.dropped_frame_count() > 0);
    }

    #[tokio::test]
    async fn explicit_delete_removes_session() {
        let router = router();
        let (_webapp, _rx) = router.register("s1", Role::Webapp);
        assert!(router.delete_session("s1"));
        assert!(!router.session_exists("s1"));
        assert!(!router.delete_session("s1"));
    }

    #[tokio::test]
    async fn dormant_sweep_removes_expired_sessions() {
        let router = Arc::new(SessionRouter::new(Duration::from_millis(0)));
        {
            let (_webapp, _rx) = router.register("s1", Role::Webapp);
        }
        std::thread::sleep(Duration::from_millis(5));
        router.sweep_dormant();
        assert!(!router.session_exists("s1"));
    }

    #[tokio::test]
    async fn summaries_reflect_session_shape() {
        let router = router();
        let (webapp, mut webapp_rx) = router.register("s1", Role::Webapp);
        let (_dev, _dev_rx) = router.register("s1", Role::Device);
        drain(&mut webapp_rx);
        router.route("s1", webapp.connection_id(), Role::Webapp, BULK);

        let summaries = router.session_summaries();
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.webapp_connections, 1);
        assert_eq!(s.device_connections, 1);
        assert!(s.has_cached_timeline);
    }
}
