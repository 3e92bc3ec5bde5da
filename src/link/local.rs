//! Local domain link
//!
//! Plain TCP connection to the LAN broker the intersection controllers talk
//! to. Receives device telemetry and delivers lane overrides in the
//! device-native `{"lane", "time"}` format.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::MqttOptions;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::client::{LinkOptions, MqttLink};
use super::{LinkError, LinkStatus, Publisher};
use crate::bridge::{InboundMessage, Origin};
use crate::config::{qos_from_u8, LocalConfig};
use crate::topic::{self, Channel, ControlCommand, CONTROL_FILTER, TELEMETRY_FILTER};

/// Filters the local link subscribes to: device telemetry and command echoes
pub(super) fn local_subscriptions() -> Vec<String> {
    vec![TELEMETRY_FILTER.to_string(), CONTROL_FILTER.to_string()]
}

/// Link to the local broker
#[derive(Clone)]
pub struct LocalLink {
    link: Arc<dyn Publisher>,
}

impl LocalLink {
    /// Wrap an existing publisher
    pub fn new(link: Arc<dyn Publisher>) -> Self {
        Self { link }
    }

    /// Spawn the connection task for the configured local broker
    pub fn connect(
        config: &LocalConfig,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (host, port) = config.parse_address();

        let mut mqtt = MqttOptions::new(config.client_id.clone(), host, port);
        mqtt.set_keep_alive(Duration::from_secs(config.keepalive as u64));
        mqtt.set_clean_session(true);
        if let Some(username) = &config.username {
            mqtt.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let options = LinkOptions {
            name: "local",
            origin: Origin::Local,
            mqtt,
            subscriptions: local_subscriptions(),
            qos: qos_from_u8(config.qos),
            reconnect_interval: config.reconnect_interval_duration(),
            request_capacity: config.request_capacity,
        };

        let (link, handle) = MqttLink::spawn(options, inbound_tx, shutdown);
        (Self::new(link), handle)
    }

    /// Deliver a lane override to a device on `traffic/<unit>/control`
    pub fn publish_command(&self, command: &ControlCommand) -> Result<(), LinkError> {
        let subject = topic::build(&command.unit_id, Channel::Control);
        self.link
            .publish(&subject, command.to_device_payload().into_bytes())
    }

    pub fn name(&self) -> &str {
        self.link.name()
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::topic::UnitId;

    struct Recorder {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Publisher for Recorder {
        fn name(&self) -> &str {
            "lan"
        }

        fn status(&self) -> LinkStatus {
            LinkStatus::Connected
        }

        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    #[test]
    fn test_subscribes_to_telemetry_and_control() {
        assert_eq!(
            local_subscriptions(),
            vec!["traffic/+/logs".to_string(), "traffic/+/control".to_string()]
        );
    }

    #[test]
    fn test_command_uses_device_format() {
        let recorder = Arc::new(Recorder {
            published: Mutex::new(Vec::new()),
        });
        let local = LocalLink::new(recorder.clone());
        assert_eq!(local.name(), "lan");

        let command = ControlCommand {
            unit_id: UnitId::new("INT_8A2F").unwrap(),
            lane: 2,
            duration_ms: 7000,
        };
        local.publish_command(&command).unwrap();

        let published = recorder.published.lock();
        assert_eq!(published[0].0, "traffic/INT_8A2F/control");
        let value: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(value, serde_json::json!({"lane": 2, "time": 7000}));
    }
}
