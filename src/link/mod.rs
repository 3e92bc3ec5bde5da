//! Broker Links
//!
//! Connections from the gateway to the local and cloud MQTT brokers. Both
//! links share one connection loop ([`MqttLink`]) and differ only in
//! transport, subscriptions and the typed publish helpers they expose.
//!
//! # Loop Prevention
//!
//! The cloud link subscribes to `traffic/+/control` only. It never subscribes
//! to `traffic/gateway/logs`, the subject it publishes envelopes on, so
//! nothing the gateway sends to the cloud can come back in.

mod client;
mod cloud;
mod local;
mod tls;

pub use client::{LinkOptions, MqttLink};
pub use cloud::CloudLink;
pub use local::LocalLink;
pub use tls::{CloudCredentials, TlsError};

use std::fmt;

/// Error type for link operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Link is not connected; the message was dropped (TRANSPORT_DISCONNECTED)
    Disconnected,
    /// Request queue to the connection task is full
    QueueFull,
    /// Request could not be handed to the connection task
    Send(String),
    /// Outbound payload could not be encoded
    Encode(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Disconnected => write!(f, "Link disconnected"),
            LinkError::QueueFull => write!(f, "Request queue full"),
            LinkError::Send(msg) => write!(f, "Send failed: {}", msg),
            LinkError::Encode(msg) => write!(f, "Encode failed: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<crate::topic::PayloadError> for LinkError {
    fn from(e: crate::topic::PayloadError) -> Self {
        LinkError::Encode(e.to_string())
    }
}

/// Status of a broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Not connected; waiting out the reconnect interval
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected and subscribed
    Connected,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Outbound side of a broker link.
///
/// `publish` is fire-and-forget: it hands the message to the connection task
/// and returns without waiting for the broker. It never blocks and never
/// panics, including while the link is down.
pub trait Publisher: Send + Sync {
    /// Name of the link, used in diagnostics
    fn name(&self) -> &str;

    /// Current connection status
    fn status(&self) -> LinkStatus;

    /// Publish a payload on a topic
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError>;
}
