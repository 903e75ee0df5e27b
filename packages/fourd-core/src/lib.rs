//! Fourd Core - shared library for the 4D home rig pipeline.
//!
//! This crate provides the core functionality for synchronizing a
//! browser video player with physical actuators (water, wind, light,
//! color, vibration) over a cloud session relay and a local command
//! bus. It is used by both the cloud edge binary and the local hub
//! binary.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`protocol`]: WebSocket frame vocabulary shared by all peers
//! - [`timeline`]: Authored events, the derived effects map, the
//!   playhead scheduler, and the on-disk timeline cache
//! - [`effects`]: Pure mapping from timeline events to bus commands
//! - [`bus`]: Bus dispatcher, transport seam, and device registry
//! - [`router`]: Per-session socket registry and fan-out routing
//! - [`api`]: Cloud edge HTTP/WebSocket surface
//! - [`hub`]: The local hub process composition
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! Two traits decouple the core from deployment specifics:
//!
//! - [`BusTransport`](bus::BusTransport): the concrete bus binding
//!   (broker client, serial bridge); tests use the in-process loopback
//! - [`EffectSink`](timeline::EffectSink): receives scheduler
//!   emissions, cutting the hub↔scheduler cycle
//! - [`SessionCatalog`](api::SessionCatalog): external session
//!   validation on upgrade

#![warn(clippy::all)]

pub mod api;
pub mod bus;
pub mod config;
pub mod constants;
pub mod effects;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod router;
pub mod timeline;
pub mod utils;

// Re-export commonly used types at the crate root
pub use bus::{BusDispatcher, BusMessage, BusTransport, DeviceRegistry, LoopbackBus};
pub use config::HubConfig;
pub use effects::{BusCommand, EffectMapper};
pub use error::{ErrorCode, FourdError, FourdResult};
pub use hub::LocalHub;
pub use protocol::{ControlCommand, Role, VideoState, WsMessage};
pub use router::{SessionRouter, SessionSummary, StopEvent};
pub use timeline::{
    Effect, EffectKey, EffectSink, EventAction, Timeline, TimelineCache, TimelineDoc,
    TimelineEvent, TimelineScheduler,
};
pub use utils::{now_iso, now_millis};

// Re-export API types
pub use api::{start_server, AllowAllCatalog, AppState, AppStateBuilder, ServerError, SessionCatalog};
