//! Live Clients
//!
//! Browser dashboards and simulated devices connected over WebSocket. Every
//! event the bridge handles is pushed to all of them; a client may also act
//! as a device by sending `log_publish` frames.
//!
//! Each client owns a bounded outbound queue drained by its own writer task.
//! [`Fanout::broadcast`] only ever uses `try_send`, so one slow or dead client
//! can neither block the bridge nor starve the others. A client whose queue
//! is closed or full is evicted.

mod server;


pub use server::LiveServer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bridge::{BridgeError, InboundMessage, Origin};
use crate::topic::{self, Channel, UnitId};

/// Identifier of a connected live client
pub type ClientId = u64;

/// Event pushed to every live client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Telemetry line from a device
    Log {
        unit_id: UnitId,
        topic: String,
        data: String,
    },
    /// Lane override delivered to a device
    Command {
        target: UnitId,
        lane: u8,
        duration: u64,
    },
    /// A unit was seen for the first time
    Discovery { unit_id: UnitId },
}

/// Frames accepted from live clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    LogPublish { topic: String, payload: String },
}

/// Result of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the frame was queued for
    pub delivered: usize,
    /// Clients removed because their queue was closed or full
    pub evicted: Vec<ClientId>,
}

/// Set of connected live clients
pub struct Fanout {
    clients: RwLock<HashMap<ClientId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Fanout {
    /// Create an empty client set; each client gets a queue of `queue_capacity` frames
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a client and return the receiving end of its outbound queue
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.clients.write().insert(id, tx);
        debug!("Live client {} registered", id);
        (id, rx)
    }

    /// Remove a client; returns false if it was already gone
    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients.write().remove(&id).is_some();
        if removed {
            debug!("Live client {} unregistered", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Queue an event for every client.
    ///
    /// The event is serialized once. A client that cannot take the frame is
    /// evicted and reported; the others still receive it.
    pub fn broadcast(&self, event: &LiveEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping live event: failed to serialize: {}", e);
                return report;
            }
        };

        {
            let clients = self.clients.read();
            for (id, tx) in clients.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!("Live client {}: send failed ({}), disconnecting", id, e);
                        report.evicted.push(*id);
                    }
                }
            }
        }

        if !report.evicted.is_empty() {
            let mut clients = self.clients.write();
            for id in &report.evicted {
                clients.remove(id);
            }
        }

        report
    }
}

/// Turn a text frame from a live client into an inbound message.
///
/// Only `{"type":"log_publish","topic":..,"payload":..}` with a
/// `traffic/<unit>/logs` topic is accepted. Anything else is dropped.
pub fn accept_inbound(text: &str) -> Option<InboundMessage> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping live client frame: {}", e);
            return None;
        }
    };

    let ClientFrame::LogPublish { topic, payload } = frame;

    match topic::parse(&topic) {
        Ok((unit_id, Channel::Logs)) => Some(InboundMessage {
            origin: Origin::Live,
            unit_id,
            channel: Channel::Logs,
            payload: Bytes::from(payload.into_bytes()),
        }),
        Ok((_, channel)) => {
            warn!(
                "Dropping live client frame: channel '{}' not accepted from live clients",
                channel
            );
            None
        }
        Err(e) => {
            warn!("Dropping live client frame: {}", BridgeError::from(e));
            None
        }
    }
}
