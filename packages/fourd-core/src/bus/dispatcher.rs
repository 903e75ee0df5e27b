//! Bus dispatcher and the transport seam it publishes through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::constants::{BUS_CHANNEL_CAPACITY, TOPIC_HEARTBEAT};
use crate::effects::BusCommand;
use crate::error::{FourdError, FourdResult};

/// One message observed on the local bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// Transport seam for the local bus.
///
/// Implementations carry `(topic, payload)` pairs to the actuator
/// firmware and surface inbound traffic (heartbeats). Publish is
/// expected to be non-blocking best-effort; the dispatcher never
/// retries a failed publish.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn connect(&self) -> FourdResult<()>;
    async fn disconnect(&self);
    fn publish(&self, topic: &str, payload: &str) -> FourdResult<()>;
    fn is_connected(&self) -> bool;
    /// Subscribes to all inbound bus traffic.
    fn inbound(&self) -> broadcast::Receiver<BusMessage>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback Transport
// ─────────────────────────────────────────────────────────────────────────────

/// In-process pub/sub bus over a broadcast channel.
///
/// Used by tests and by the hub's dry-run wiring when no concrete bus
/// binding is deployed. Published commands are observable through
/// [`BusTransport::inbound`] and logged at debug level.
pub struct LoopbackBus {
    tx: broadcast::Sender<BusMessage>,
    connected: AtomicBool,
}

impl LoopbackBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CHANNEL_CAPACITY);
        Self {
            tx,
            connected: AtomicBool::new(false),
        }
    }

    /// Injects an inbound message, as a bus peer would. Test hook and
    /// heartbeat simulation entry point.
    pub fn inject(&self, topic: &str, payload: &str) {
        let _ = self.tx.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusTransport for LoopbackBus {
    async fn connect(&self) -> FourdResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        log::info!("[Bus] loopback transport connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        log::info!("[Bus] loopback transport disconnected");
    }

    fn publish(&self, topic: &str, payload: &str) -> FourdResult<()> {
        if !self.is_connected() {
            return Err(FourdError::Bus("not connected".into()));
        }
        log::debug!("[Bus] publish: {} = {}", topic, payload);
        let _ = self.tx.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn inbound(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Callback invoked with the device id from each received heartbeat.
pub type HeartbeatCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Best-effort command dispatcher for the local bus.
///
/// `publish` returns immediately; a failed publish is logged and never
/// raised. Ordering is FIFO per topic (the transport serializes sends);
/// no ordering is promised across topics. Reconnection is a host
/// responsibility — the dispatcher does not retry.
pub struct BusDispatcher {
    transport: Arc<dyn BusTransport>,
    heartbeat_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BusDispatcher {
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self {
            transport,
            heartbeat_task: Mutex::new(None),
        }
    }

    /// Connects the underlying transport.
    pub async fn connect(&self) -> FourdResult<()> {
        self.transport.connect().await
    }

    /// Disconnects the transport and stops heartbeat observation.
    pub async fn disconnect(&self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
        self.transport.disconnect().await;
    }

    /// Whether the transport currently reports a live connection.
    pub fn connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Fire-and-forget publish. Failures are logged, never raised.
    pub fn publish(&self, topic: &str, payload: &str) {
        if let Err(e) = self.transport.publish(topic, payload) {
            log::warn!("[Bus] publish skipped: {} = {} ({})", topic, payload, e);
        }
    }

    /// Publishes a command list in order.
    pub fn publish_all(&self, commands: &[BusCommand]) {
        for command in commands {
            self.publish(command.topic, command.payload);
        }
    }

    /// Registers a heartbeat observer on the well-known heartbeat topic.
    ///
    /// The callback is invoked once per received heartbeat with the
    /// device id parsed from the payload. Replaces any prior observer.
    pub fn subscribe_heartbeat(&self, callback: HeartbeatCallback) {
        let mut rx = self.transport.inbound();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if msg.topic == TOPIC_HEARTBEAT => {
                        callback(msg.payload.trim());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[Bus] heartbeat observer lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(prev) = self.heartbeat_task.lock().replace(task) {
            prev.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn publish_before_connect_is_swallowed() {
        let bus = Arc::new(LoopbackBus::new());
        let dispatcher = BusDispatcher::new(bus.clone());
        // Not connected: must not panic or error out
        dispatcher.publish("/4dx/wind", "ON");
    }

    #[tokio::test]
    async fn published_commands_reach_subscribers_in_order() {
        let bus = Arc::new(LoopbackBus::new());
        let dispatcher = BusDispatcher::new(bus.clone());
        dispatcher.connect().await.unwrap();

        let mut rx = bus.inbound();
        dispatcher.publish("/4dx/wind", "ON");
        dispatcher.publish("/4dx/wind", "OFF");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.topic.as_str(), first.payload.as_str()), ("/4dx/wind", "ON"));
        assert_eq!((second.topic.as_str(), second.payload.as_str()), ("/4dx/wind", "OFF"));
    }

    #[tokio::test]
    async fn heartbeat_callback_sees_device_ids() {
        let bus = Arc::new(LoopbackBus::new());
        let dispatcher = BusDispatcher::new(bus.clone());
        dispatcher.connect().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        dispatcher.subscribe_heartbeat(Arc::new(move |device_id| {
            assert_eq!(device_id, "alive_esp1_water");
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        // Give the observer task a chance to subscribe before injecting
        tokio::task::yield_now().await;
        bus.inject(TOPIC_HEARTBEAT, "alive_esp1_water");
        bus.inject("/4dx/wind", "ON"); // unrelated topic, ignored

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
