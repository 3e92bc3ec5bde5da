//! Live client WebSocket server

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info};

use super::{accept_inbound, Fanout};
use crate::bridge::InboundMessage;
use crate::config::LiveConfig;

/// Accepts live clients and wires them to the fan-out
pub struct LiveServer {
    listener: TcpListener,
    path: Option<String>,
    fanout: Arc<Fanout>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl LiveServer {
    /// Bind the listener
    pub async fn bind(
        config: &LiveConfig,
        fanout: Arc<Fanout>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            listener,
            path: config.path.clone(),
            fanout,
            inbound_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        match self.local_addr() {
            Ok(addr) => info!(
                "Live WebSocket listening on {} (path: {})",
                addr,
                self.path.as_deref().unwrap_or("any")
            ),
            Err(e) => error!("Live WebSocket listener has no local address: {}", e),
        }

        loop {
            tokio::select! {
                biased;

                result = shutdown.recv() => {
                    match result {
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        _ => break,
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!("New live connection from {}", addr);
                            tokio::spawn(handle_client(
                                stream,
                                addr,
                                self.path.clone(),
                                self.fanout.clone(),
                                self.inbound_tx.clone(),
                                shutdown.resubscribe(),
                            ));
                        }
                        Err(e) => {
                            error!("Failed to accept live connection: {}", e);
                        }
                    }
                }
            }
        }

        info!("Live WebSocket server stopped");
    }
}

/// WebSocket handshake, rejecting requests for any other path
async fn accept(
    stream: TcpStream,
    expected_path: Option<String>,
) -> Result<WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error> {
    let Some(expected_path) = expected_path else {
        return tokio_tungstenite::accept_async(stream).await;
    };

    tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, response: Response| {
        let request_path = req.uri().path();
        if request_path != expected_path {
            let mut rejection = ErrorResponse::new(Some(format!(
                "Invalid path: expected '{}', got '{}'",
                expected_path, request_path
            )));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }
        Ok(response)
    })
    .await
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    path: Option<String>,
    fanout: Arc<Fanout>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let ws = match accept(stream, path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Live handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut sink, mut source) = ws.split();
    let (id, mut frames) = fanout.register();
    info!("Live client {} connected from {}", id, addr);

    // Ends when the client is unregistered (queue closed) or the socket fails
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = sink.send(Message::Text(frame)).await {
                debug!("Live client {}: write failed: {}", id, e);
                return;
            }
        }
        let _ = sink.close().await;
    });
    let mut writer_done = false;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => break,
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(inbound) = accept_inbound(&text) {
                            if inbound_tx.send(inbound).await.is_err() {
                                debug!("Live client {}: inbound queue closed", id);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Live client {}: read failed: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    fanout.unregister(id);
    if !writer_done {
        let _ = writer.await;
    }
    info!("Live client {} disconnected", id);
}
