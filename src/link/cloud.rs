//! Cloud domain link
//!
//! Mutual-TLS connection to the managed cloud broker. Device telemetry leaves
//! the gateway wrapped in an [`Envelope`] on `traffic/gateway/logs`; operator
//! commands arrive on `traffic/+/control`.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::MqttOptions;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::client::{LinkOptions, MqttLink};
use super::{CloudCredentials, LinkError, LinkStatus, Publisher};
use crate::bridge::{InboundMessage, Origin};
use crate::config::{qos_from_u8, CloudConfig};
use crate::topic::{
    self, Channel, ControlCommand, Envelope, TelemetryRecord, CONTROL_FILTER, GATEWAY_LOGS_TOPIC,
};

/// Filters the cloud link subscribes to.
///
/// Never includes [`GATEWAY_LOGS_TOPIC`]: our own envelopes must not come
/// back in.
pub(super) fn cloud_subscriptions() -> Vec<String> {
    vec![CONTROL_FILTER.to_string()]
}

/// Link to the cloud broker
#[derive(Clone)]
pub struct CloudLink {
    link: Arc<dyn Publisher>,
}

impl CloudLink {
    /// Wrap an existing publisher
    pub fn new(link: Arc<dyn Publisher>) -> Self {
        Self { link }
    }

    /// Spawn the connection task for the configured cloud broker
    pub fn connect(
        config: &CloudConfig,
        credentials: &CloudCredentials,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (host, port) = config.parse_address();

        let mut mqtt = MqttOptions::new(config.client_id.clone(), host, port);
        mqtt.set_keep_alive(Duration::from_secs(config.keepalive as u64));
        mqtt.set_clean_session(true);
        mqtt.set_transport(credentials.transport());

        let options = LinkOptions {
            name: "cloud",
            origin: Origin::Cloud,
            mqtt,
            subscriptions: cloud_subscriptions(),
            qos: qos_from_u8(config.qos),
            reconnect_interval: config.reconnect_interval_duration(),
            request_capacity: config.request_capacity,
        };

        let (link, handle) = MqttLink::spawn(options, inbound_tx, shutdown);
        (Self::new(link), handle)
    }

    /// Wrap a telemetry record and publish it on `traffic/gateway/logs`
    pub fn publish_envelope(&self, record: &TelemetryRecord) -> Result<(), LinkError> {
        let payload = record.envelope().encode()?;
        self.link.publish(GATEWAY_LOGS_TOPIC, payload)
    }

    /// Publish an operator command on `traffic/<unit>/control`.
    ///
    /// The command reaches the local broker through the cloud subscription,
    /// exactly like a command issued from the cloud console.
    pub fn publish_override(&self, command: &ControlCommand) -> Result<(), LinkError> {
        let subject = topic::build(&command.unit_id, Channel::Control);
        self.link
            .publish(&subject, command.to_cloud_payload().into_bytes())
    }

    fn publish_heartbeat(&self) -> Result<(), LinkError> {
        let payload = Envelope::heartbeat().encode()?;
        self.link.publish(GATEWAY_LOGS_TOPIC, payload)
    }

    pub fn name(&self) -> &str {
        self.link.name()
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }

    /// Publish a heartbeat envelope every `interval` while connected
    pub fn spawn_heartbeat(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let link = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            info!("Cloud heartbeat every {:?}", interval);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if link.status() != LinkStatus::Connected {
                            debug!("Cloud heartbeat skipped: link {}", link.status());
                            continue;
                        }
                        match link.publish_heartbeat() {
                            Ok(()) => debug!("Cloud heartbeat sent"),
                            Err(e) => debug!("Cloud heartbeat failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
