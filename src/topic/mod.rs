//! Topic Router
//!
//! Maps MQTT subjects of the form `traffic/<unit>/<channel>` to a structured
//! `(UnitId, Channel)` pair and back, and normalizes control payloads into
//! [`ControlCommand`]s. Nothing in this module performs I/O.
//!
//! Subject rules:
//! - The first level is the literal `traffic`
//! - The second level is a non-empty unit identifier without wildcards
//! - The third level is `logs` or `control`
//! - There are exactly three levels

mod payload;

#[cfg(test)]
mod tests;

pub use payload::{
    normalize_control_payload, ControlCommand, Envelope, PayloadError, TelemetryRecord,
    DEFAULT_OVERRIDE_DURATION_MS, HEARTBEAT_DATA, MAX_LANE,
};

use std::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// First level of every subject the gateway acts on
pub const TOPIC_PREFIX: &str = "traffic";

/// Wildcard filter for device telemetry
pub const TELEMETRY_FILTER: &str = "traffic/+/logs";

/// Wildcard filter for lane override commands
pub const CONTROL_FILTER: &str = "traffic/+/control";

/// Subject the gateway publishes envelopes and heartbeats on (cloud only)
pub const GATEWAY_LOGS_TOPIC: &str = "traffic/gateway/logs";

/// Unit id used by the gateway itself in heartbeat envelopes
pub const GATEWAY_UNIT: &str = "gateway";

/// Unit id reserved for the browser-hosted simulated intersection
pub const BOOTSTRAP_UNIT: &str = "INT_WEB";

/// Identifier of a physical or simulated intersection controller
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(CompactString);

impl UnitId {
    /// Create a unit id, rejecting values that could not appear as a
    /// subject level.
    pub fn new(id: &str) -> Result<Self, TopicError> {
        if !is_valid_unit_level(id) {
            return Err(TopicError::InvalidUnitId(id.to_string()));
        }
        Ok(Self(CompactString::from(id)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Channel level of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Device telemetry (device -> gateway)
    Logs,
    /// Lane override commands (operator -> device)
    Control,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Logs => "logs",
            Channel::Control => "control",
        }
    }

    fn from_level(level: &str) -> Option<Self> {
        match level {
            "logs" => Some(Channel::Logs),
            "control" => Some(Channel::Control),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic routing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// Subject does not follow `traffic/<unit>/<logs|control>`
    Malformed(String),
    /// Unit id is empty or contains a level separator, wildcard or null
    InvalidUnitId(String),
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::Malformed(subject) => write!(f, "Malformed subject: {:?}", subject),
            TopicError::InvalidUnitId(id) => write!(f, "Invalid unit id: {:?}", id),
        }
    }
}

impl std::error::Error for TopicError {}

fn is_valid_unit_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#', '\0'])
}

/// Parse a subject into its unit id and channel.
///
/// Any deviation from `traffic/<unit>/<logs|control>` yields
/// [`TopicError::Malformed`]; callers drop such messages.
pub fn parse(subject: &str) -> Result<(UnitId, Channel), TopicError> {
    let malformed = || TopicError::Malformed(subject.to_string());

    let mut levels = subject.split('/');
    if levels.next() != Some(TOPIC_PREFIX) {
        return Err(malformed());
    }

    let unit = levels.next().ok_or_else(malformed)?;
    let channel = levels
        .next()
        .and_then(Channel::from_level)
        .ok_or_else(malformed)?;

    if levels.next().is_some() || !is_valid_unit_level(unit) {
        return Err(malformed());
    }

    Ok((UnitId(CompactString::from(unit)), channel))
}

/// Build the subject for a unit and channel (inverse of [`parse`])
pub fn build(unit_id: &UnitId, channel: Channel) -> String {
    format!("{}/{}/{}", TOPIC_PREFIX, unit_id, channel)
}
