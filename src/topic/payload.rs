//! Message payloads
//!
//! Telemetry records, the cloud envelope and control command normalization.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{UnitId, GATEWAY_UNIT};

/// Override duration used when a command carries neither `duration` nor `time`
pub const DEFAULT_OVERRIDE_DURATION_MS: u64 = 5000;

/// `data` field of heartbeat envelopes
pub const HEARTBEAT_DATA: &str = "HEARTBEAT";

/// Highest lane index on an intersection controller (lanes are 0..=3)
pub const MAX_LANE: u8 = 3;

/// Control payload errors (INVALID_PAYLOAD)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload is not valid UTF-8 JSON
    NotJson(String),
    /// Payload is JSON but not an object
    NotAnObject,
    /// `lane` field is absent
    MissingLane,
    /// `lane` is not an integer in 0..=3
    InvalidLane(String),
    /// `duration`/`time` is not a non-negative integer
    InvalidDuration(String),
    /// Outbound payload could not be serialized
    Encode(String),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::NotJson(e) => write!(f, "Payload is not JSON: {}", e),
            PayloadError::NotAnObject => write!(f, "Payload is not a JSON object"),
            PayloadError::MissingLane => write!(f, "Missing 'lane' field"),
            PayloadError::InvalidLane(v) => write!(f, "Invalid lane: {}", v),
            PayloadError::InvalidDuration(v) => write!(f, "Invalid duration: {}", v),
            PayloadError::Encode(e) => write!(f, "Encode error: {}", e),
        }
    }
}

impl std::error::Error for PayloadError {}

/// A telemetry line produced by a device, or by a live client acting as one
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub unit_id: UnitId,
    pub raw_payload: String,
    pub received_at: SystemTime,
}

impl TelemetryRecord {
    pub fn new(unit_id: UnitId, raw_payload: impl Into<String>) -> Self {
        Self {
            unit_id,
            raw_payload: raw_payload.into(),
            received_at: SystemTime::now(),
        }
    }

    /// Build a record from an MQTT payload; invalid UTF-8 is replaced rather
    /// than rejected since the payload is forwarded as opaque text.
    pub fn from_bytes(unit_id: UnitId, payload: &[u8]) -> Self {
        Self::new(unit_id, String::from_utf8_lossy(payload).into_owned())
    }

    /// Wrap this record for the cloud outbound logs subject
    pub fn envelope(&self) -> Envelope {
        Envelope {
            unit_id: self.unit_id.to_string(),
            data: self.raw_payload.clone(),
            timestamp: unix_seconds(self.received_at),
        }
    }
}

/// Wrapper added when forwarding a device payload into the cloud domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub unit_id: String,
    pub data: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl Envelope {
    /// Liveness envelope published by the gateway itself
    pub fn heartbeat() -> Self {
        Self {
            unit_id: GATEWAY_UNIT.to_string(),
            data: HEARTBEAT_DATA.to_string(),
            timestamp: unix_seconds(SystemTime::now()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(self).map_err(|e| PayloadError::Encode(e.to_string()))
    }
}

fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A lane override addressed to one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub unit_id: UnitId,
    pub lane: u8,
    pub duration_ms: u64,
}

impl ControlCommand {
    /// Payload in the device-native format: `{"lane": n, "time": ms}`
    pub fn to_device_payload(&self) -> String {
        json!({ "lane": self.lane, "time": self.duration_ms }).to_string()
    }

    /// Payload in the cloud command format: `{"lane": n, "duration": ms}`
    pub fn to_cloud_payload(&self) -> String {
        json!({ "lane": self.lane, "duration": self.duration_ms }).to_string()
    }
}

/// Normalize a control payload into a [`ControlCommand`].
///
/// `lane` must be an integer in 0..=3. The duration comes from `duration`,
/// falling back to the legacy `time` field, then to
/// [`DEFAULT_OVERRIDE_DURATION_MS`].
pub fn normalize_control_payload(
    unit_id: UnitId,
    raw: &[u8],
) -> Result<ControlCommand, PayloadError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| PayloadError::NotJson(e.to_string()))?;
    let object = value.as_object().ok_or(PayloadError::NotAnObject)?;

    let lane = match object.get("lane") {
        None | Some(Value::Null) => return Err(PayloadError::MissingLane),
        Some(lane) => lane
            .as_u64()
            .filter(|l| *l <= MAX_LANE as u64)
            .ok_or_else(|| PayloadError::InvalidLane(lane.to_string()))? as u8,
    };

    let duration = ["duration", "time"]
        .iter()
        .find_map(|key| object.get(*key).filter(|v| !v.is_null()));

    let duration_ms = match duration {
        None => DEFAULT_OVERRIDE_DURATION_MS,
        Some(d) => d
            .as_u64()
            .ok_or_else(|| PayloadError::InvalidDuration(d.to_string()))?,
    };

    Ok(ControlCommand {
        unit_id,
        lane,
        duration_ms,
    })
}
