//! HTTP server for the control API

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::{ApiResponse, ControlApi};

/// Largest request body accepted by `POST /override`
const MAX_BODY_SIZE: usize = 16 * 1024;

/// HTTP server exposing the control API
pub struct ApiServer {
    api: Arc<ControlApi>,
    listener: TcpListener,
}

impl ApiServer {
    pub async fn bind(api: Arc<ControlApi>, addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { api, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = self.local_addr() {
            info!("Control API listening on http://{}", addr);
        }

        loop {
            let (stream, addr) = tokio::select! {
                biased;

                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept API connection: {}", e);
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let api = self.api.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let api = api.clone();
                    async move { handle_request(req, api).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving API connection from {}: {:?}", addr, err);
                }
            });
        }

        info!("Control API stopped");
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    api: Arc<ControlApi>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let rejected = ApiResponse {
                status: StatusCode::BAD_REQUEST,
                content_type: "text/plain; charset=utf-8",
                body: format!("Invalid body: {}", e),
            };
            return Ok(into_response(rejected));
        }
    };

    let response = api.handle(&parts.method, parts.uri.path(), parts.uri.query(), &body);
    Ok(into_response(response))
}

fn into_response(response: ApiResponse) -> Response<Full<Bytes>> {
    let mut http = Response::new(Full::new(Bytes::from(response.body)));
    *http.status_mut() = response.status;
    http.headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static(response.content_type));
    http
}
