use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use http::{header, Method, Response};
use matchit::{Match, Router};
use pingora::{
    apps::http_app::ServeHttp, protocols::http::ServerSession, services::listening::Service,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::{
    config::Reqdesk,
    core::DeskResult,
    request::{LifecycleManager, NewRequest, RequestSet},
    utils::response::{content_type, CommonErrors, ResponseBuilder},
    validation_error,
};

#[async_trait]
trait Handler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        body: &[u8],
        params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>>;
}

/// HTTP front of the lifecycle manager.
pub struct RequestsHttpApp {
    manager: Arc<LifecycleManager>,
    router: Router<HashMap<Method, Box<dyn Handler + Send + Sync>>>,
}

impl RequestsHttpApp {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        let mut this = Self {
            manager,
            router: Router::new(),
        };

        this.route("/api/requests", Method::POST, Box::new(SubmitHandler))
            .route(
                "/api/requests",
                Method::GET,
                Box::new(ListHandler(RequestSet::Open)),
            )
            .route(
                "/api/closed-requests",
                Method::GET,
                Box::new(ListHandler(RequestSet::Closed)),
            )
            .route("/api/requests/{id}", Method::DELETE, Box::new(CloseHandler))
            .route(
                "/api/move-to-closed",
                Method::POST,
                Box::new(MoveToClosedHandler),
            )
            .route(
                "/api/reopen-request/{id}",
                Method::POST,
                Box::new(ReopenHandler),
            )
            .route(
                "/api/update-status",
                Method::POST,
                Box::new(UpdateStatusHandler(RequestSet::Open)),
            )
            .route(
                "/api/update-closed-status",
                Method::POST,
                Box::new(UpdateStatusHandler(RequestSet::Closed)),
            )
            .route(
                "/api/closed-requests/{id}",
                Method::DELETE,
                Box::new(DeleteClosedHandler),
            );

        this
    }

    /// 添加一个路由处理函数
    fn route(
        &mut self,
        path: &str,
        method: Method,
        handler: Box<dyn Handler + Send + Sync>,
    ) -> &mut Self {
        if let Ok(routes) = self.router.at_mut(path) {
            routes.value.insert(method, handler);
            return self;
        }

        let mut handlers = HashMap::new();
        handlers.insert(method, handler);
        if let Err(e) = self.router.insert(path, handlers) {
            log::error!("Failed to register route {path}: {e}");
        }
        self
    }

    pub fn requests_http_service(cfg: &Reqdesk, manager: Arc<LifecycleManager>) -> Service<Self> {
        let app = Self::new(manager);
        let mut service = Service::new("Requests HTTP".to_string(), app);
        service.add_tcp(&cfg.listener.to_string());
        service
    }

    /// Route one request and run its handler.
    pub async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Response<Vec<u8>> {
        let Match { value, params } = match self.router.at(path) {
            Ok(matched) => matched,
            Err(_) => return CommonErrors::not_found(),
        };
        let Some(handler) = value.get(method) else {
            return CommonErrors::method_not_allowed();
        };

        if !is_blank(body) && !is_json(content_type) {
            return CommonErrors::bad_request("Content-Type must be application/json");
        }

        let params: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        match handler.handle(&self.manager, body, params).await {
            Ok(resp) => resp,
            Err(e) => ResponseBuilder::from_error(&e),
        }
    }
}

#[async_trait]
impl ServeHttp for RequestsHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        http_session.set_keepalive(None);

        let (path, method, content_type) = {
            let req_header = http_session.req_header();
            (
                req_header.uri.path().to_string(),
                req_header.method.clone(),
                req_header
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            )
        };

        let body = match read_request_body(http_session).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Failed to read body of {method} {path}: {e}");
                return CommonErrors::bad_request("Unable to read request body");
            }
        };

        log::debug!("{method} {path}");
        self.dispatch(&method, &path, content_type.as_deref(), &body)
            .await
    }
}

async fn read_request_body(http_session: &mut ServerSession) -> pingora_error::Result<Vec<u8>> {
    let mut body_data = Vec::new();
    while let Some(bytes) = http_session.read_request_body().await? {
        body_data.extend_from_slice(&bytes);
    }
    Ok(body_data)
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(content_type::APPLICATION_JSON))
}

/// Decode a JSON body; an empty body yields the type's default.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> DeskResult<T> {
    if is_blank(body) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| validation_error!("Invalid JSON body: {e}"))
}

fn path_id(params: &BTreeMap<String, String>) -> DeskResult<i64> {
    params
        .get("id")
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or_else(|| validation_error!("Invalid request ID."))
}

/// `{id, status}` body shared by the relabel and move endpoints.
///
/// `id` may arrive as a number or a numeric string.
#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    id: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

impl StatusBody {
    fn require(self) -> DeskResult<(i64, String)> {
        match (self.id, self.status) {
            (Some(id), Some(status)) if id > 0 && !status.trim().is_empty() => Ok((id, status)),
            _ => Err(validation_error!("Missing request ID or status.")),
        }
    }
}

struct SubmitHandler;

#[async_trait]
impl Handler for SubmitHandler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        body: &[u8],
        _params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>> {
        let request: NewRequest = parse_body(body)?;
        let record = manager.submit(request).await?;
        Ok(ResponseBuilder::success_json(&record))
    }
}

struct ListHandler(RequestSet);

#[async_trait]
impl Handler for ListHandler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        _body: &[u8],
        _params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>> {
        let records = match self.0 {
            RequestSet::Open => manager.list_open().await?,
            RequestSet::Closed => manager.list_closed().await?,
        };
        Ok(ResponseBuilder::success_json(&records))
    }
}

struct CloseHandler;

#[async_trait]
impl Handler for CloseHandler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        _body: &[u8],
        params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>> {
        manager.close(path_id(&params)?, None).await?;
        Ok(ResponseBuilder::message(
            "Request moved to closed successfully.",
        ))
    }
}

struct MoveToClosedHandler;

#[async_trait]
impl Handler for MoveToClosedHandler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        body: &[u8],
        _params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>> {
        let (id, status) = parse_body::<StatusBody>(body)?.require()?;
        let record = manager.close(id, Some(&status)).await?;
        Ok(ResponseBuilder::message(&format!(
            "Request moved to closed with status: {}.",
            record.status()
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReopenBody {
    #[serde(default)]
    status: Option<String>,
}

struct ReopenHandler;

#[async_trait]
impl Handler for ReopenHandler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        body: &[u8],
        params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>> {
        let id = path_id(&params)?;
        let ReopenBody { status } = parse_body(body)?;
        let record = manager.reopen(id, status.as_deref()).await?;
        Ok(ResponseBuilder::message(&format!(
            "Request reopened with status: {}",
            record.status()
        )))
    }
}

struct UpdateStatusHandler(RequestSet);

#[async_trait]
impl Handler for UpdateStatusHandler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        body: &[u8],
        _params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>> {
        let (id, status) = parse_body::<StatusBody>(body)?.require()?;
        let message = match self.0 {
            RequestSet::Open => {
                manager.update_status(id, &status).await?;
                "Request status updated successfully."
            }
            RequestSet::Closed => {
                manager.update_closed_status(id, &status).await?;
                "Closed request status updated successfully."
            }
        };
        Ok(ResponseBuilder::message(message))
    }
}

struct DeleteClosedHandler;

#[async_trait]
impl Handler for DeleteClosedHandler {
    async fn handle(
        &self,
        manager: &LifecycleManager,
        _body: &[u8],
        params: BTreeMap<String, String>,
    ) -> DeskResult<Response<Vec<u8>>> {
        manager.delete_closed(path_id(&params)?).await?;
        Ok(ResponseBuilder::message(
            "Closed request deleted successfully.",
        ))
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::{json, Value};

    use super::*;
    use crate::storage::MemoryStore;

    const JSON: Option<&str> = Some("application/json");

    fn app() -> RequestsHttpApp {
        RequestsHttpApp::new(Arc::new(LifecycleManager::new(Arc::new(
            MemoryStore::new(),
        ))))
    }

    async fn call(
        app: &RequestsHttpApp,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body = body
            .map(|b| serde_json::to_vec(&b).unwrap())
            .unwrap_or_default();
        let resp = app.dispatch(&method, path, JSON, &body).await;
        let value = serde_json::from_slice(resp.body()).unwrap_or(Value::Null);
        (resp.status(), value)
    }

    fn dune() -> Value {
        json!({"name": "Alice", "media": "book", "title": "Dune", "mediaLink": "http://x"})
    }

    #[tokio::test]
    async fn test_submit_and_list() {
        let app = app();
        let (status, created) = call(&app, Method::POST, "/api/requests", Some(dune())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["id"], 1);
        assert_eq!(created["mediaLink"], "http://x");

        let (status, open) = call(&app, Method::GET, "/api/requests", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(open.as_array().unwrap().len(), 1);
        assert_eq!(open[0]["title"], "Dune");
    }

    #[tokio::test]
    async fn test_submit_missing_field() {
        let app = app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/requests",
            Some(json!({"name": "Alice", "media": "book"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields.");
    }

    #[tokio::test]
    async fn test_lifecycle_over_http() {
        let app = app();
        call(&app, Method::POST, "/api/requests", Some(dune())).await;

        let (status, body) = call(&app, Method::DELETE, "/api/requests/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Request moved to closed successfully.");

        let (_, closed) = call(&app, Method::GET, "/api/closed-requests", None).await;
        assert_eq!(closed[0]["id"], 1);
        assert!(closed[0]["closed_at"].is_string());

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/reopen-request/1",
            Some(json!({"status": "Approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Request reopened with status: Approved");

        let (_, open) = call(&app, Method::GET, "/api/requests", None).await;
        assert_eq!(open[0]["id"], 1);
        assert_eq!(open[0]["status"], "Approved");
        let (_, closed) = call(&app, Method::GET, "/api/closed-requests", None).await;
        assert_eq!(closed, json!([]));
    }

    #[tokio::test]
    async fn test_reopen_without_body_defaults_to_pending() {
        let app = app();
        call(&app, Method::POST, "/api/requests", Some(dune())).await;
        call(&app, Method::DELETE, "/api/requests/1", None).await;

        let resp = app
            .dispatch(&Method::POST, "/api/reopen-request/1", None, b"")
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let (_, open) = call(&app, Method::GET, "/api/requests", None).await;
        assert_eq!(open[0]["status"], "Pending");
    }

    #[tokio::test]
    async fn test_move_to_closed_requires_status() {
        let app = app();
        call(&app, Method::POST, "/api/requests", Some(dune())).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/move-to-closed",
            Some(json!({"id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing request ID or status.");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/move-to-closed",
            Some(json!({"id": "1", "status": "Declined"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Request moved to closed with status: Declined.");

        let (_, closed) = call(&app, Method::GET, "/api/closed-requests", None).await;
        assert_eq!(closed[0]["status"], "Declined");
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let app = app();
        let (status, body) = call(&app, Method::DELETE, "/api/requests/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Request not found.");

        let (status, body) = call(&app, Method::POST, "/api/reopen-request/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Closed request not found.");

        // Relabel and delete stay permissive.
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/update-status",
            Some(json!({"id": 7, "status": "Approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::DELETE, "/api/closed-requests/7", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_status_validation() {
        let app = app();
        for body in [
            json!({"status": "Approved"}),
            json!({"id": 1}),
            json!({"id": 1, "status": ""}),
            json!({"id": 0, "status": "Approved"}),
            json!({"id": "-3", "status": "Approved"}),
        ] {
            let (status, _) = call(&app, Method::POST, "/api/update-closed-status", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_update_closed_status_and_delete() {
        let app = app();
        call(&app, Method::POST, "/api/requests", Some(dune())).await;
        call(&app, Method::DELETE, "/api/requests/1", None).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/update-closed-status",
            Some(json!({"id": 1, "status": "Declined"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Closed request status updated successfully.");
        let (_, closed) = call(&app, Method::GET, "/api/closed-requests", None).await;
        assert_eq!(closed[0]["status"], "Declined");

        let (status, _) = call(&app, Method::DELETE, "/api/closed-requests/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, closed) = call(&app, Method::GET, "/api/closed-requests", None).await;
        assert_eq!(closed, json!([]));
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let app = app();
        let (status, _) = call(&app, Method::GET, "/api/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::PUT, "/api/requests", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, body) = call(&app, Method::DELETE, "/api/requests/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request ID.");
    }

    #[tokio::test]
    async fn test_body_content_checks() {
        let app = app();
        let body = serde_json::to_vec(&dune()).unwrap();
        let resp = app
            .dispatch(&Method::POST, "/api/requests", Some("text/plain"), &body)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .dispatch(
                &Method::POST,
                "/api/requests",
                Some("application/json; charset=utf-8"),
                &body,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .dispatch(&Method::POST, "/api/requests", JSON, b"{not json")
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
