//! Broker Link Configuration
//!
//! Configuration structures for the local and cloud MQTT broker links.

use std::time::Duration;

use serde::Deserialize;

/// Default port for plain MQTT
pub const MQTT_PORT: u16 = 1883;

/// Default port for MQTT over TLS
pub const MQTTS_PORT: u16 = 8883;

fn default_local_address() -> String {
    format!("localhost:{}", MQTT_PORT)
}

fn default_local_client_id() -> String {
    format!("traffic-gateway-{}", std::process::id())
}

fn default_cloud_client_id() -> String {
    "TrafficGateway_Bridge".to_string()
}

fn default_keepalive() -> u16 {
    60
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_local_qos() -> u8 {
    0
}

fn default_cloud_qos() -> u8 {
    1
}

fn default_request_capacity() -> usize {
    100
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(60)
}

/// Split `host:port` into parts, falling back to `default_port`
fn split_address(address: &str, default_port: u16) -> (String, u16) {
    if let Some((host, port_str)) = address.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (host.to_string(), port);
        }
    }
    (address.to_string(), default_port)
}

/// Local broker link (plain TCP, LAN only)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Broker address (host:port or just host)
    pub address: String,

    /// Client ID to use when connecting
    pub client_id: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    pub keepalive: u16,

    /// Fixed delay between connection attempts in seconds
    pub reconnect_interval: u64,

    /// QoS for subscriptions and control publishes
    pub qos: u8,

    /// Outbound request queue capacity
    pub request_capacity: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            address: default_local_address(),
            client_id: default_local_client_id(),
            username: None,
            password: None,
            keepalive: default_keepalive(),
            reconnect_interval: default_reconnect_interval(),
            qos: default_local_qos(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl LocalConfig {
    /// Parse address into host and port
    pub fn parse_address(&self) -> (String, u16) {
        split_address(&self.address, MQTT_PORT)
    }

    /// Get the reconnect interval as Duration
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
}

/// Cloud broker link (MQTT over TLS with a client certificate)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Broker endpoint (host:port or just host)
    pub address: String,

    /// Client ID to use when connecting
    pub client_id: String,

    /// Keep-alive interval in seconds
    pub keepalive: u16,

    /// Fixed delay between connection attempts in seconds
    pub reconnect_interval: u64,

    /// QoS for subscriptions and envelope publishes
    pub qos: u8,

    /// Outbound request queue capacity
    pub request_capacity: usize,

    /// Gateway heartbeat period (e.g. "60s"); "0s" disables the heartbeat
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Client certificate material (required)
    pub tls: Option<CloudTlsConfig>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            client_id: default_cloud_client_id(),
            keepalive: default_keepalive(),
            reconnect_interval: default_reconnect_interval(),
            qos: default_cloud_qos(),
            request_capacity: default_request_capacity(),
            heartbeat_interval: default_heartbeat_interval(),
            tls: None,
        }
    }
}

impl CloudConfig {
    /// Parse address into host and port
    pub fn parse_address(&self) -> (String, u16) {
        split_address(&self.address, MQTTS_PORT)
    }

    /// Get the reconnect interval as Duration
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    /// Heartbeat period, or None when disabled
    pub fn heartbeat(&self) -> Option<Duration> {
        (!self.heartbeat_interval.is_zero()).then_some(self.heartbeat_interval)
    }
}

/// PEM files for the cloud link
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CloudTlsConfig {
    /// Path to CA certificate file
    pub ca_cert: String,

    /// Path to client certificate file
    pub client_cert: String,

    /// Path to client private key file
    pub client_key: String,
}

/// Convert a configured QoS level
pub fn qos_from_u8(qos: u8) -> rumqttc::QoS {
    match qos {
        0 => rumqttc::QoS::AtMostOnce,
        1 => rumqttc::QoS::AtLeastOnce,
        _ => rumqttc::QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_port() {
        let config = LocalConfig {
            address: "192.168.1.20:1884".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_address(), ("192.168.1.20".to_string(), 1884));
    }

    #[test]
    fn test_parse_address_without_port() {
        let local = LocalConfig {
            address: "raspberrypi.local".to_string(),
            ..Default::default()
        };
        assert_eq!(local.parse_address().1, MQTT_PORT);

        let cloud = CloudConfig {
            address: "example-ats.iot.us-east-1.amazonaws.com".to_string(),
            ..Default::default()
        };
        let (host, port) = cloud.parse_address();
        assert_eq!(host, "example-ats.iot.us-east-1.amazonaws.com");
        assert_eq!(port, MQTTS_PORT);
    }

    #[test]
    fn test_heartbeat_disabled() {
        let cloud = CloudConfig {
            heartbeat_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(cloud.heartbeat(), None);
        assert_eq!(
            CloudConfig::default().heartbeat(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_u8(0), rumqttc::QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), rumqttc::QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), rumqttc::QoS::ExactlyOnce);
    }
}
