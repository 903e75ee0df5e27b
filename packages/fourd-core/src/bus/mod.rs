//! Local actuator bus: dispatcher, transport seam, and peer registry.
//!
//! The dispatcher emits `(topic, payload)` pairs with best-effort
//! fire-and-forget semantics. Which concrete bus (MQTT broker, serial
//! bridge) carries them is a deployment decision behind the
//! [`BusTransport`] trait; the crate ships an in-process
//! [`LoopbackBus`] used by tests and dry-run wiring.

mod dispatcher;
mod registry;

pub use dispatcher::{BusDispatcher, BusMessage, BusTransport, LoopbackBus};
pub use registry::{DeviceRegistry, DeviceStatus, DeviceSummary};
