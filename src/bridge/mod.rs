//! Bridge Core
//!
//! Routes every inbound message between the three domains the gateway
//! connects: the local broker, the cloud broker and live clients.
//!
//! | origin       | channel   | action                                          |
//! |--------------|-----------|-------------------------------------------------|
//! | local, live  | `logs`    | envelope to cloud `traffic/gateway/logs`, `log` event |
//! | cloud        | `control` | `{"lane","time"}` to local broker, `command` event     |
//! | anything else|           | registry only                                   |
//!
//! # Loop Prevention
//!
//! A message is never re-published into the domain it came from: local
//! telemetry only goes to the cloud, cloud commands only go to the local
//! broker, and the cloud link does not subscribe to its own outbound subject.

mod router;


pub use router::Bridge;

use std::fmt;

use bytes::Bytes;

use crate::link::LinkError;
use crate::live::ClientId;
use crate::topic::{Channel, PayloadError, TopicError, UnitId};

/// Domain a message arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Local broker (intersection controllers on the LAN)
    Local,
    /// Cloud broker
    Cloud,
    /// Live WebSocket client acting as a device
    Live,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Cloud => write!(f, "cloud"),
            Origin::Live => write!(f, "live"),
        }
    }
}

/// A message tagged with its origin, as queued for the bridge core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub origin: Origin,
    pub unit_id: UnitId,
    pub channel: Channel,
    pub payload: Bytes,
}

/// Recoverable bridge errors. Each one is logged where the message is
/// dropped; none of them stops the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Subject does not follow `traffic/<unit>/<logs|control>`
    MalformedSubject(TopicError),
    /// Control payload could not be normalized
    InvalidPayload(PayloadError),
    /// Outbound link could not take the message
    TransportDisconnected { link: String, cause: LinkError },
    /// A live client could not take a frame and was disconnected
    ClientSendFailure(ClientId),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::MalformedSubject(e) => write!(f, "{}", e),
            BridgeError::InvalidPayload(e) => write!(f, "Invalid payload: {}", e),
            BridgeError::TransportDisconnected { link, cause } => {
                write!(f, "{} link unavailable: {}", link, cause)
            }
            BridgeError::ClientSendFailure(id) => write!(f, "Live client {} send failed", id),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<TopicError> for BridgeError {
    fn from(e: TopicError) -> Self {
        BridgeError::MalformedSubject(e)
    }
}

impl From<PayloadError> for BridgeError {
    fn from(e: PayloadError) -> Self {
        BridgeError::InvalidPayload(e)
    }
}

/// What the bridge did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Device telemetry forwarded to the cloud
    Telemetry,
    /// Cloud command delivered to the local broker
    Command,
    /// Combination that is never forwarded (e.g. local control echo)
    Ignored,
    /// Control payload failed to normalize
    Rejected,
}

/// Result of routing one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// The unit was seen for the first time
    pub discovered: bool,
    pub disposition: Disposition,
    /// Publishes handed to the cloud link
    pub cloud_published: usize,
    /// Publishes handed to the local link
    pub local_published: usize,
    /// Frames queued for live clients (discovery included)
    pub live_delivered: usize,
    /// Failures that did not stop routing
    pub errors: Vec<BridgeError>,
}

impl RouteOutcome {
    fn new(discovered: bool) -> Self {
        Self {
            discovered,
            disposition: Disposition::Ignored,
            cloud_published: 0,
            local_published: 0,
            live_delivered: 0,
            errors: Vec::new(),
        }
    }
}
