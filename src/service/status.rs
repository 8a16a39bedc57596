use async_trait::async_trait;
use http::{Response, StatusCode};
use pingora::{
    apps::http_app::ServeHttp, protocols::http::ServerSession, services::listening::Service,
};
use serde::Serialize;

use crate::{
    config::Status,
    core::status,
    utils::response::{CommonErrors, ResponseBuilder},
};

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Readiness probe, served on its own listener so load balancers can poll
/// it without touching the request API.
pub struct StatusHttpApp {
    config: Status,
}

impl StatusHttpApp {
    pub fn new(cfg: &Status) -> Self {
        Self {
            config: cfg.clone(),
        }
    }

    pub fn status_http_service(cfg: &Status) -> Service<Self> {
        let app = Self::new(cfg);
        let addr = &app.config.address.to_string();
        let mut service = Service::new("Status HTTP".to_string(), app);
        service.add_tcp(addr);
        service
    }
}

#[async_trait]
impl ServeHttp for StatusHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        http_session.set_keepalive(None);
        route_status(http_session.req_header().uri.path())
    }
}

fn route_status(path: &str) -> Response<Vec<u8>> {
    match path {
        "/status/ready" => handle_ready_endpoint(),
        _ => CommonErrors::not_found(),
    }
}

fn handle_ready_endpoint() -> Response<Vec<u8>> {
    if status::is_ready() {
        let response = StatusResponse {
            status: "ok".to_string(),
            error: None,
        };
        ResponseBuilder::json(StatusCode::OK, &response)
    } else {
        let response = StatusResponse {
            status: "error".to_string(),
            error: Some("Request store not reachable yet".to_string()),
        };
        ResponseBuilder::json(StatusCode::SERVICE_UNAVAILABLE, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::{mark_ready, reset, tests::TEST_LOCK, StoreKind};

    #[test]
    fn test_ready_endpoint() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        let resp = route_status("/status/ready");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        mark_ready(StoreKind::Memory);
        let resp = route_status("/status/ready");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body(), br#"{"status":"ok"}"#);
    }

    #[test]
    fn test_unknown_path() {
        assert_eq!(route_status("/status").status(), StatusCode::NOT_FOUND);
    }
}
