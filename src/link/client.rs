//! MQTT Link Client
//!
//! Runs the connection loop for one broker on top of rumqttc and exposes the
//! fire-and-forget [`Publisher`] side to the rest of the gateway.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{LinkError, LinkStatus, Publisher};
use crate::bridge::{BridgeError, InboundMessage, Origin};
use crate::topic;

/// Everything needed to run a link
pub struct LinkOptions {
    /// Link name used in diagnostics ("local", "cloud")
    pub name: &'static str,
    /// Domain tag attached to inbound messages
    pub origin: Origin,
    /// Broker connection options, including transport
    pub mqtt: MqttOptions,
    /// Filters (re)subscribed on every CONNACK
    pub subscriptions: Vec<String>,
    /// QoS for subscriptions and publishes
    pub qos: QoS,
    /// Fixed delay between connection attempts
    pub reconnect_interval: Duration,
    /// Capacity of the request queue between publishers and the connection task
    pub request_capacity: usize,
}

/// A broker connection
pub struct MqttLink {
    name: &'static str,
    client: AsyncClient,
    status: Arc<RwLock<LinkStatus>>,
    qos: QoS,
}

impl MqttLink {
    /// Spawn the connection task.
    ///
    /// Inbound messages that parse as `traffic/<unit>/<channel>` are pushed
    /// onto `inbound_tx`; everything else is dropped. The task exits when
    /// `shutdown` fires or the inbound queue is closed.
    pub fn spawn(
        options: LinkOptions,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (client, eventloop) = AsyncClient::new(options.mqtt.clone(), options.request_capacity);
        let status = Arc::new(RwLock::new(LinkStatus::Disconnected));

        let link = Arc::new(Self {
            name: options.name,
            client: client.clone(),
            status: status.clone(),
            qos: options.qos,
        });

        let handle = tokio::spawn(connection_loop(
            options, client, eventloop, status, inbound_tx, shutdown,
        ));

        (link, handle)
    }
}

impl Publisher for MqttLink {
    fn name(&self) -> &str {
        self.name
    }

    fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        if self.status() != LinkStatus::Connected {
            debug!("Link '{}': Not connected, dropping publish to {}", self.name, topic);
            return Err(LinkError::Disconnected);
        }

        self.client
            .try_publish(topic, self.qos, false, payload)
            .map_err(|e| match e {
                ClientError::TryRequest(_) => LinkError::QueueFull,
                e => LinkError::Send(e.to_string()),
            })?;

        debug!("Link '{}': Published to {}", self.name, topic);
        Ok(())
    }
}

/// What happened to one inbound PUBLISH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handoff {
    Queued,
    Dropped,
    Closed,
}

/// Parse an inbound PUBLISH and queue it for the bridge.
///
/// Never waits: the connection task also answers keepalives, so a full
/// inbound queue drops the message instead of stalling the event loop.
fn hand_off(
    name: &str,
    origin: Origin,
    publish: &Publish,
    inbound_tx: &mpsc::Sender<InboundMessage>,
) -> Handoff {
    let (unit_id, channel) = match topic::parse(&publish.topic) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Link '{}': Dropping message: {}", name, BridgeError::from(e));
            return Handoff::Dropped;
        }
    };

    let message = InboundMessage {
        origin,
        unit_id,
        channel,
        payload: publish.payload.clone(),
    };

    match inbound_tx.try_send(message) {
        Ok(()) => Handoff::Queued,
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!(
                "Link '{}': Inbound queue full, dropping message for {}",
                name, message.unit_id
            );
            Handoff::Dropped
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Handoff::Closed,
    }
}

/// Drive the rumqttc event loop until shutdown.
///
/// rumqttc reconnects on the next `poll` after an error; this loop adds the
/// fixed delay between attempts and tracks the link status.
async fn connection_loop(
    options: LinkOptions,
    client: AsyncClient,
    mut eventloop: EventLoop,
    status: Arc<RwLock<LinkStatus>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let name = options.name;
    let (host, port) = options.mqtt.broker_address();
    info!("Link '{}': Connecting to {}:{}", name, host, port);
    *status.write() = LinkStatus::Connecting;

    loop {
        let event = tokio::select! {
            biased;

            result = shutdown.recv() => {
                match result {
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    _ => break,
                }
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                *status.write() = LinkStatus::Connected;
                info!("Link '{}': Connected to {}:{}", name, host, port);

                for filter in &options.subscriptions {
                    match client.try_subscribe(filter.as_str(), options.qos) {
                        Ok(()) => debug!("Link '{}': Subscribing to {}", name, filter),
                        Err(e) => error!("Link '{}': Subscribe to {} failed: {}", name, filter, e),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if hand_off(name, options.origin, &publish, &inbound_tx) == Handoff::Closed {
                    debug!("Link '{}': Inbound queue closed", name);
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Link '{}': SUBACK received", name);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Link '{}': Broker sent DISCONNECT", name);
                *status.write() = LinkStatus::Disconnected;
            }
            Ok(_) => {}
            Err(e) => {
                *status.write() = LinkStatus::Disconnected;
                error!(
                    "Link '{}': Connection to {}:{} failed: {}; retrying in {:?}",
                    name, host, port, e, options.reconnect_interval
                );

                tokio::select! {
                    biased;

                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(options.reconnect_interval) => {}
                }

                *status.write() = LinkStatus::Connecting;
                debug!("Link '{}': Reconnecting", name);
            }
        }
    }

    let _ = client.try_disconnect();
    *status.write() = LinkStatus::Disconnected;
    info!("Link '{}': Stopped", name);
}
