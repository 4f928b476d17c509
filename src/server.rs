use crate::error::{json_error_response, GatewayError, GatewayErrorCode};
use crate::launcher;
use crate::response::{json_response, text_response, GatewayResponse};
use crate::state::SharedState;
use crate::status;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::borrow::Cow;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Version information for the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Header name for request ID
pub const X_REQUEST_ID: &str = "x-request-id";

const START_PREFIX: &str = "/api/orchestrators/";
const STATUS_PREFIX: &str = "/api/status/";

/// Longest client-supplied request ID that is propagated as-is
const MAX_REQUEST_ID_LEN: usize = 128;

/// The gateway HTTP server
pub struct GatewayServer {
    bind_addr: SocketAddr,
    state: SharedState,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(bind_addr: SocketAddr, state: SharedState, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            bind_addr,
            state,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown is signalled
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, state).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender means nobody can ask us to stop anymore
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(stream: S, addr: SocketAddr, state: SharedState) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    // A client that disconnects drops this future and with it any pending
    // engine call. The orchestration itself keeps running.
    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move {
            debug!(client = %addr, "Request received");
            Ok::<_, Infallible>(handle_request(req, state).await)
        }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Version,
    Start(&'a str),
    Status(&'a str),
    Unknown,
}

impl<'a> Route<'a> {
    fn from_path(path: &'a str) -> Self {
        if let Some(name) = path.strip_prefix(START_PREFIX) {
            return Route::Start(name);
        }
        if let Some(id) = path.strip_prefix(STATUS_PREFIX) {
            return Route::Status(id);
        }
        match path {
            "/health" => Route::Health,
            "/version" => Route::Version,
            _ => Route::Unknown,
        }
    }

    fn allowed_method(&self) -> Option<Method> {
        match self {
            Route::Health | Route::Version | Route::Status(_) => Some(Method::GET),
            Route::Start(_) => Some(Method::POST),
            Route::Unknown => None,
        }
    }
}

/// Handle one request end to end. Never fails: every error becomes a JSON
/// error response.
pub async fn handle_request<B>(req: Request<B>, state: SharedState) -> GatewayResponse
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request_id = request_id(req.headers());
    debug!(method = %req.method(), uri = %req.uri(), request_id = %request_id, "Incoming request");

    let mut response = route(req, &state, &request_id).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

async fn route<B>(req: Request<B>, state: &SharedState, request_id: &str) -> GatewayResponse
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let route = Route::from_path(parts.uri.path());

    let allowed = match route.allowed_method() {
        Some(allowed) => allowed,
        None => {
            return json_error_response(GatewayErrorCode::RouteNotFound, "No route for this path");
        }
    };
    if parts.method != allowed {
        return method_not_allowed(&allowed);
    }

    match route {
        Route::Health => text_response(StatusCode::OK, "ok"),

        Route::Version => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            }),
        ),

        Route::Start(raw_name) => {
            let name = match decode_segment(raw_name) {
                Ok(name) => name,
                Err(e) => return error_response(e, request_id, None),
            };
            let input = match read_json_input(&parts.headers, body, state.max_body_bytes).await {
                Ok(input) => input,
                Err(e) => return error_response(e, request_id, None),
            };

            let ctx = state.forwarding_context(&parts.headers);
            match launcher::start(state, &name, input, &ctx).await {
                Ok(started) => started.into_response(),
                Err(e) => error_response(e, request_id, None),
            }
        }

        Route::Status(raw_id) => {
            let instance_id = match decode_segment(raw_id) {
                Ok(id) => id,
                Err(e) => return error_response(e, request_id, None),
            };

            let ctx = state.forwarding_context(&parts.headers);
            match status::get_status(state, &instance_id, &ctx).await {
                Ok(response) => response,
                Err(e) => error_response(e, request_id, Some(instance_id.as_ref())),
            }
        }

        Route::Unknown => json_error_response(GatewayErrorCode::RouteNotFound, "No route for this path"),
    }
}

/// Log a surfaced error with its correlation ids and render it
fn error_response(err: GatewayError, request_id: &str, instance_id: Option<&str>) -> GatewayResponse {
    match &err {
        GatewayError::EngineUnavailable(_) | GatewayError::InvalidEngineResponse(_) => {
            error!(request_id, instance_id, error = %err, "Engine call failed");
        }
        GatewayError::NotFound(_) => {
            info!(request_id, instance_id, "Unknown instance");
        }
        GatewayError::InvalidRequest(_) | GatewayError::PayloadTooLarge { .. } => {
            warn!(request_id, instance_id, error = %err, "Rejected request");
        }
    }
    err.into_response()
}

fn method_not_allowed(allowed: &Method) -> GatewayResponse {
    let mut response = json_error_response(
        GatewayErrorCode::MethodNotAllowed,
        format!("Method not allowed, use {}", allowed),
    );
    if let Ok(value) = HeaderValue::from_str(allowed.as_str()) {
        response.headers_mut().insert(hyper::header::ALLOW, value);
    }
    response
}

/// Propagate a sane client request ID or generate one
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id.chars().all(|c| c.is_ascii_graphic())
        })
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn decode_segment(raw: &str) -> Result<Cow<'_, str>, GatewayError> {
    urlencoding::decode(raw)
        .map_err(|_| GatewayError::InvalidRequest("path segment is not valid UTF-8".to_string()))
}

/// Read an optional JSON input. An empty or whitespace-only body is no input.
async fn read_json_input<B>(
    headers: &HeaderMap,
    body: B,
    limit: usize,
) -> Result<Option<serde_json::Value>, GatewayError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let declared = headers
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(GatewayError::PayloadTooLarge { limit });
    }

    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(GatewayError::PayloadTooLarge { limit });
        }
        Err(e) => {
            return Err(GatewayError::InvalidRequest(format!(
                "failed to read request body: {}",
                e
            )));
        }
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| GatewayError::InvalidRequest(format!("request body is not valid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::InMemoryEngine;
    use crate::engine::WebhookUrls;
    use crate::state::GatewayState;
    use http_body_util::Full;

    fn state() -> SharedState {
        let engine = InMemoryEngine::new(WebhookUrls::new("http://127.0.0.1:7071", None, None, None));
        Arc::new(GatewayState::new(Arc::new(engine)).with_max_body_bytes(64))
    }

    fn request(method: Method, path: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(body.into()))
            .unwrap()
    }

    async fn json_body(response: GatewayResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_route_matching() {
        assert_eq!(Route::from_path("/health"), Route::Health);
        assert_eq!(Route::from_path("/version"), Route::Version);
        assert_eq!(
            Route::from_path("/api/orchestrators/HelloOrchestrator"),
            Route::Start("HelloOrchestrator")
        );
        assert_eq!(Route::from_path("/api/status/abc"), Route::Status("abc"));
        assert_eq!(Route::from_path("/api/status/"), Route::Status(""));
        assert_eq!(Route::from_path("/api/orchestrators"), Route::Unknown);
        assert_eq!(Route::from_path("/"), Route::Unknown);
    }

    #[test]
    fn test_request_id_propagation() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-123"));
        assert_eq!(request_id(&headers), "req-123");

        headers.insert(X_REQUEST_ID, HeaderValue::from_static("has space"));
        let generated = request_id(&headers);
        assert_ne!(generated, "has space");
        assert!(Uuid::parse_str(&generated).is_ok());
    }

    #[tokio::test]
    async fn test_health() {
        let response = handle_request(request(Method::GET, "/health", ""), state()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_version() {
        let response = handle_request(request(Method::GET, "/version", ""), state()).await;
        let body = json_body(response).await;
        assert_eq!(body["name"], PKG_NAME);
        assert_eq!(body["version"], VERSION);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = handle_request(request(Method::GET, "/nope", ""), state()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("x-gateway-error").unwrap(),
            "ROUTE_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let response = handle_request(
            request(Method::GET, "/api/orchestrators/HelloOrchestrator", ""),
            state(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("Allow").unwrap(), "POST");

        let response = handle_request(request(Method::DELETE, "/api/status/abc", ""), state()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("Allow").unwrap(), "GET");
    }

    #[tokio::test]
    async fn test_start_with_json_input() {
        let response = handle_request(
            request(Method::POST, "/api/orchestrators/HelloOrchestrator", r#"{"name":"World"}"#),
            state(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert!(body["id"].is_string());
    }

    #[tokio::test]
    async fn test_start_with_invalid_json() {
        let response = handle_request(
            request(Method::POST, "/api/orchestrators/HelloOrchestrator", "{not json"),
            state(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_with_oversized_body() {
        let body = format!("\"{}\"", "x".repeat(100));
        let response = handle_request(
            request(Method::POST, "/api/orchestrators/HelloOrchestrator", body),
            state(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_start_with_empty_name() {
        let response = handle_request(request(Method::POST, "/api/orchestrators/", ""), state()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_with_encoded_unknown_id() {
        let response = handle_request(request(Method::GET, "/api/status/a%20b", ""), state()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("x-gateway-error").unwrap(),
            "INSTANCE_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_read_json_input_whitespace_is_none() {
        let input = read_json_input(&HeaderMap::new(), Full::new(Bytes::from_static(b"  \n")), 64)
            .await
            .unwrap();
        assert_eq!(input, None);
    }
}
