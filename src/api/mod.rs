//! Control API
//!
//! Small HTTP surface for operator dashboards:
//!
//! - `GET /devices` lists every known unit id, sorted, as a JSON array
//! - `GET /override?target=INT_1&lane=2&duration=10000` or `POST /override`
//!   with `{"target","lane","duration"}` issues a lane override. `duration`
//!   is in milliseconds (default 5000). `duration_s` takes seconds instead
//!   and is ignored when `duration` is present
//! - `GET /health` answers `OK`
//!
//! Overrides are published on the cloud control subject, so they reach the
//! device through the same path as commands from the cloud console.

mod server;

pub use server::ApiServer;

use std::sync::Arc;

use hyper::{Method, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use crate::link::{CloudLink, LinkError, LinkStatus};
use crate::registry::DeviceRegistry;
use crate::topic::{ControlCommand, UnitId, DEFAULT_OVERRIDE_DURATION_MS, MAX_LANE};

/// Response produced by the API handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

impl ApiResponse {
    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn json(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body,
        }
    }
}

/// Raw override parameters from a query string or JSON body
#[derive(Debug, Default, Deserialize)]
struct OverrideParams {
    target: Option<String>,
    lane: Option<u64>,
    duration: Option<u64>,
    duration_s: Option<u64>,
}

impl OverrideParams {
    fn from_query(query: &str) -> Result<Self, String> {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "target" => params.target = Some(value.into_owned()),
                "lane" => {
                    params.lane = Some(
                        value
                            .parse()
                            .map_err(|_| format!("Invalid lane: {}", value))?,
                    )
                }
                "duration" => {
                    params.duration = Some(
                        value
                            .parse()
                            .map_err(|_| format!("Invalid duration: {}", value))?,
                    )
                }
                "duration_s" => {
                    params.duration_s = Some(
                        value
                            .parse()
                            .map_err(|_| format!("Invalid duration_s: {}", value))?,
                    )
                }
                _ => {}
            }
        }
        Ok(params)
    }

    fn from_json(body: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(body).map_err(|e| format!("Invalid body: {}", e))
    }

    fn into_command(self) -> Result<ControlCommand, String> {
        let target = self.target.ok_or("Missing params: target")?;
        let unit_id = UnitId::new(&target).map_err(|e| e.to_string())?;

        let lane = self.lane.ok_or("Missing params: lane")?;
        if lane > MAX_LANE as u64 {
            return Err(format!("Invalid lane: {}", lane));
        }

        let duration_ms = match (self.duration, self.duration_s) {
            (Some(ms), _) => ms,
            (None, Some(secs)) => secs
                .checked_mul(1000)
                .ok_or_else(|| format!("Invalid duration_s: {}", secs))?,
            (None, None) => DEFAULT_OVERRIDE_DURATION_MS,
        };

        Ok(ControlCommand {
            unit_id,
            lane: lane as u8,
            duration_ms,
        })
    }
}

/// Request handlers shared by all API connections
pub struct ControlApi {
    registry: Arc<DeviceRegistry>,
    cloud: CloudLink,
}

impl ControlApi {
    pub fn new(registry: Arc<DeviceRegistry>, cloud: CloudLink) -> Self {
        Self { registry, cloud }
    }

    /// Dispatch a request
    pub fn handle(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        body: &[u8],
    ) -> ApiResponse {
        match (method, path) {
            (&Method::GET, "/devices") => self.devices(),
            (&Method::GET, "/override") => {
                match OverrideParams::from_query(query.unwrap_or("")) {
                    Ok(params) => self.override_lane(params),
                    Err(msg) => ApiResponse::text(StatusCode::BAD_REQUEST, msg),
                }
            }
            (&Method::POST, "/override") => match OverrideParams::from_json(body) {
                Ok(params) => self.override_lane(params),
                Err(msg) => ApiResponse::text(StatusCode::BAD_REQUEST, msg),
            },
            (&Method::GET, "/health") => ApiResponse::text(StatusCode::OK, "OK"),
            (_, "/devices" | "/override" | "/health") => {
                ApiResponse::text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
            }
            _ => ApiResponse::text(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn devices(&self) -> ApiResponse {
        match serde_json::to_string(&self.registry.snapshot()) {
            Ok(body) => ApiResponse::json(body),
            Err(e) => ApiResponse::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    fn override_lane(&self, params: OverrideParams) -> ApiResponse {
        let command = match params.into_command() {
            Ok(command) => command,
            Err(msg) => {
                warn!("API: Rejected override: {}", msg);
                return ApiResponse::text(StatusCode::BAD_REQUEST, msg);
            }
        };

        if self.cloud.status() != LinkStatus::Connected {
            warn!(
                "API: Override for {} refused: cloud link {}",
                command.unit_id,
                self.cloud.status()
            );
            return ApiResponse::text(StatusCode::SERVICE_UNAVAILABLE, "Cloud link not connected");
        }

        match self.cloud.publish_override(&command) {
            Ok(()) => {
                info!(
                    "API: Sent override -> {} lane {} for {} ms",
                    command.unit_id, command.lane, command.duration_ms
                );
                ApiResponse::text(StatusCode::OK, "OK")
            }
            Err(LinkError::Disconnected) => {
                ApiResponse::text(StatusCode::SERVICE_UNAVAILABLE, "Cloud link not connected")
            }
            Err(e) => {
                warn!("API: Override for {} failed: {}", command.unit_id, e);
                ApiResponse::text(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::link::Publisher;
    use crate::topic::BOOTSTRAP_UNIT;

    struct FakeCloud {
        status: Mutex<LinkStatus>,
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Publisher for FakeCloud {
        fn name(&self) -> &str {
            "cloud"
        }

        fn status(&self) -> LinkStatus {
            *self.status.lock()
        }

        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn api(status: LinkStatus) -> (ControlApi, Arc<FakeCloud>) {
        let cloud = Arc::new(FakeCloud {
            status: Mutex::new(status),
            published: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(DeviceRegistry::with_bootstrap([
            UnitId::new(BOOTSTRAP_UNIT).unwrap()
        ]));
        (ControlApi::new(registry, CloudLink::new(cloud.clone())), cloud)
    }

    #[test]
    fn test_devices_sorted() {
        let (api, _) = api(LinkStatus::Connected);
        api.registry.mark_seen(&UnitId::new("INT_B").unwrap());
        api.registry.mark_seen(&UnitId::new("INT_A").unwrap());

        let response = api.handle(&Method::GET, "/devices", None, b"");
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "application/json");
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body, json!(["INT_A", "INT_B", "INT_WEB"]));
    }

    #[test]
    fn test_override_from_query() {
        let (api, cloud) = api(LinkStatus::Connected);
        let response = api.handle(
            &Method::GET,
            "/override",
            Some("target=INT_WEB&lane=1&duration=10000"),
            b"",
        );
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "OK");

        let published = cloud.published.lock();
        assert_eq!(published[0].0, "traffic/INT_WEB/control");
        let payload: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(payload, json!({"lane": 1, "duration": 10000}));
    }

    #[test]
    fn test_override_default_duration() {
        let (api, cloud) = api(LinkStatus::Connected);
        api.handle(&Method::GET, "/override", Some("target=INT_1&lane=0"), b"");

        let payload: serde_json::Value =
            serde_json::from_slice(&cloud.published.lock()[0].1).unwrap();
        assert_eq!(payload, json!({"lane": 0, "duration": 5000}));
    }

    #[test]
    fn test_override_duration_in_seconds() {
        let (api, cloud) = api(LinkStatus::Connected);
        let response = api.handle(
            &Method::GET,
            "/override",
            Some("target=INT_1&lane=1&duration_s=10"),
            b"",
        );
        assert_eq!(response.status, StatusCode::OK);
        let response = api.handle(
            &Method::POST,
            "/override",
            None,
            br#"{"target":"INT_1","lane":2,"duration_s":3}"#,
        );
        assert_eq!(response.status, StatusCode::OK);
        // Milliseconds win when both are given
        api.handle(
            &Method::GET,
            "/override",
            Some("target=INT_1&lane=0&duration=2500&duration_s=10"),
            b"",
        );

        let payloads: Vec<serde_json::Value> = cloud
            .published
            .lock()
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect();
        assert_eq!(
            payloads,
            vec![
                json!({"lane": 1, "duration": 10000}),
                json!({"lane": 2, "duration": 3000}),
                json!({"lane": 0, "duration": 2500}),
            ]
        );
    }

    #[test]
    fn test_override_from_json() {
        let (api, cloud) = api(LinkStatus::Connected);
        let response = api.handle(
            &Method::POST,
            "/override",
            None,
            br#"{"target":"INT_8A2F","lane":3,"duration":2500}"#,
        );
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(cloud.published.lock()[0].0, "traffic/INT_8A2F/control");
    }

    #[test]
    fn test_override_bad_requests() {
        let (api, cloud) = api(LinkStatus::Connected);
        for query in [
            "lane=1",
            "target=INT_1",
            "target=INT_1&lane=x",
            "target=INT_1&lane=4",
            "target=INT_1&lane=1&duration=-5",
            "target=INT_1&lane=1&duration_s=1.5",
            "target=INT_1&lane=1&duration_s=18446744073709552",
            "target=a%2Fb&lane=1",
            "target=&lane=1",
        ] {
            let response = api.handle(&Method::GET, "/override", Some(query), b"");
            assert_eq!(response.status, StatusCode::BAD_REQUEST, "query {}", query);
        }

        let response = api.handle(&Method::POST, "/override", None, b"{\"lane\":1}");
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        let response = api.handle(&Method::POST, "/override", None, b"not json");
        assert_eq!(response.status, StatusCode::BAD_REQUEST);

        assert!(cloud.published.lock().is_empty());
    }

    #[test]
    fn test_override_cloud_down() {
        let (api, cloud) = api(LinkStatus::Connecting);
        let response = api.handle(&Method::GET, "/override", Some("target=INT_1&lane=1"), b"");
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(cloud.published.lock().is_empty());
    }

    #[test]
    fn test_health_and_unknown_paths() {
        let (api, _) = api(LinkStatus::Disconnected);
        assert_eq!(api.handle(&Method::GET, "/health", None, b"").status, StatusCode::OK);
        assert_eq!(api.handle(&Method::GET, "/nope", None, b"").status, StatusCode::NOT_FOUND);
        assert_eq!(
            api.handle(&Method::DELETE, "/devices", None, b"").status,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
