//! Traffic Gateway - edge bridge for smart intersection controllers
//!
//! Relays device telemetry from a local MQTT broker to a cloud MQTT broker,
//! delivers lane override commands from the cloud back to the devices, and
//! mirrors everything to live WebSocket dashboards.

pub mod api;
pub mod bridge;
pub mod config;
pub mod link;
pub mod live;
pub mod registry;
pub mod topic;

pub use api::{ApiServer, ControlApi};
pub use bridge::{Bridge, BridgeError, InboundMessage, Origin, RouteOutcome};
pub use config::Config;
pub use link::{CloudCredentials, CloudLink, LinkError, LinkStatus, LocalLink, Publisher};
pub use live::{Fanout, LiveEvent, LiveServer};
pub use registry::DeviceRegistry;
pub use topic::{Channel, ControlCommand, TelemetryRecord, UnitId};
