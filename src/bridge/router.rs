//! Message routing between the local, cloud and live domains

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BridgeError, Disposition, InboundMessage, Origin, RouteOutcome};
use crate::link::{CloudLink, LocalLink};
use crate::live::{Fanout, LiveEvent};
use crate::registry::DeviceRegistry;
use crate::topic::{self, normalize_control_payload, Channel, TelemetryRecord};

/// Routes inbound messages. Shared by all drain tasks.
pub struct Bridge {
    registry: Arc<DeviceRegistry>,
    fanout: Arc<Fanout>,
    local: LocalLink,
    cloud: CloudLink,
}

impl Bridge {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        fanout: Arc<Fanout>,
        local: LocalLink,
        cloud: CloudLink,
    ) -> Self {
        Self {
            registry,
            fanout,
            local,
            cloud,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Route one message.
    ///
    /// Never blocks: link publishes are fire-and-forget and live clients are
    /// fed through `try_send`. Failures are logged and collected in the
    /// outcome; the remaining steps still run.
    pub fn route(&self, message: &InboundMessage) -> RouteOutcome {
        let discovered = self.registry.mark_seen(&message.unit_id);
        let mut outcome = RouteOutcome::new(discovered);

        if discovered {
            self.broadcast(
                &LiveEvent::Discovery {
                    unit_id: message.unit_id.clone(),
                },
                &mut outcome,
            );
        }

        match (message.origin, message.channel) {
            (Origin::Local | Origin::Live, Channel::Logs) => {
                self.forward_telemetry(message, &mut outcome)
            }
            (Origin::Cloud, Channel::Control) => self.forward_command(message, &mut outcome),
            (origin, channel) => {
                debug!(
                    "Bridge: Not forwarding {} {} from {}",
                    message.unit_id, channel, origin
                );
            }
        }

        outcome
    }

    fn forward_telemetry(&self, message: &InboundMessage, outcome: &mut RouteOutcome) {
        outcome.disposition = Disposition::Telemetry;
        let record = TelemetryRecord::from_bytes(message.unit_id.clone(), &message.payload);

        match self.cloud.publish_envelope(&record) {
            Ok(()) => {
                outcome.cloud_published += 1;
                debug!("Bridge: {} logs -> cloud", record.unit_id);
            }
            Err(cause) => self.link_failed(self.cloud.name(), cause, outcome),
        }

        let topic = topic::build(&record.unit_id, Channel::Logs);
        self.broadcast(
            &LiveEvent::Log {
                unit_id: record.unit_id,
                topic,
                data: record.raw_payload,
            },
            outcome,
        );
    }

    fn forward_command(&self, message: &InboundMessage, outcome: &mut RouteOutcome) {
        let command = match normalize_control_payload(message.unit_id.clone(), &message.payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Bridge: Dropping command for {}: {}", message.unit_id, e);
                outcome.disposition = Disposition::Rejected;
                outcome.errors.push(BridgeError::from(e));
                return;
            }
        };

        outcome.disposition = Disposition::Command;
        info!(
            "Bridge: Override {} lane {} for {} ms",
            command.unit_id, command.lane, command.duration_ms
        );

        match self.local.publish_command(&command) {
            Ok(()) => outcome.local_published += 1,
            Err(cause) => self.link_failed(self.local.name(), cause, outcome),
        }

        self.broadcast(
            &LiveEvent::Command {
                target: command.unit_id,
                lane: command.lane,
                duration: command.duration_ms,
            },
            outcome,
        );
    }

    fn link_failed(&self, link: &str, cause: crate::link::LinkError, outcome: &mut RouteOutcome) {
        let error = BridgeError::TransportDisconnected {
            link: link.to_string(),
            cause,
        };
        warn!("Bridge: Message dropped: {}", error);
        outcome.errors.push(error);
    }

    fn broadcast(&self, event: &LiveEvent, outcome: &mut RouteOutcome) {
        let report = self.fanout.broadcast(event);
        outcome.live_delivered += report.delivered;
        outcome
            .errors
            .extend(report.evicted.into_iter().map(BridgeError::ClientSendFailure));
    }

    /// Drain one inbound queue until it closes or shutdown fires.
    ///
    /// Messages from one queue are routed in arrival order.
    pub fn spawn_drain(
        self: &Arc<Self>,
        name: &'static str,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let bridge = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => break,
                    message = inbound.recv() => {
                        let Some(message) = message else { break };
                        let outcome = bridge.route(&message);
                        debug!(
                            "Bridge: {} {} {} -> {:?}",
                            name, message.unit_id, message.channel, outcome.disposition
                        );
                    }
                }
            }
            debug!("Bridge: {} queue drained", name);
        })
    }
}
