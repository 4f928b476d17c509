//! Gateway errors and their JSON responses

use crate::engine::EngineError;
use crate::response::{full, GatewayResponse};
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Header naming the error code on every error response
pub const X_GATEWAY_ERROR: &str = "x-gateway-error";

/// Seconds a client should wait before retrying after an engine outage
pub const ENGINE_RETRY_AFTER_SECS: u64 = 5;

/// Error codes for gateway errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// Malformed request or unsupported orchestration name
    InvalidRequest,
    /// Request body over the configured limit
    PayloadTooLarge,
    /// The engine does not know the instance id
    InstanceNotFound,
    /// No route for the path
    RouteNotFound,
    /// Route exists but not for this method
    MethodNotAllowed,
    /// Engine timed out or could not be reached
    EngineUnavailable,
    /// Engine answered with something the gateway cannot interpret
    InvalidEngineResponse,
    /// Internal gateway error
    InternalError,
}

impl GatewayErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            GatewayErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayErrorCode::InstanceNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayErrorCode::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayErrorCode::InvalidEngineResponse => StatusCode::BAD_GATEWAY,
            GatewayErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::InvalidRequest => "INVALID_REQUEST",
            GatewayErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            GatewayErrorCode::InstanceNotFound => "INSTANCE_NOT_FOUND",
            GatewayErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            GatewayErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            GatewayErrorCode::EngineUnavailable => "ENGINE_UNAVAILABLE",
            GatewayErrorCode::InvalidEngineResponse => "INVALID_ENGINE_RESPONSE",
            GatewayErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Errors surfaced by the launcher and status responder.
///
/// Forwarding-header and URI parse failures never reach this type: they fall
/// back to the unmodified value where they happen.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("invalid engine response: {0}")]
    InvalidEngineResponse(String),
}

impl GatewayError {
    pub fn code(&self) -> GatewayErrorCode {
        match self {
            GatewayError::InvalidRequest(_) => GatewayErrorCode::InvalidRequest,
            GatewayError::PayloadTooLarge { .. } => GatewayErrorCode::PayloadTooLarge,
            GatewayError::NotFound(_) => GatewayErrorCode::InstanceNotFound,
            GatewayError::EngineUnavailable(_) => GatewayErrorCode::EngineUnavailable,
            GatewayError::InvalidEngineResponse(_) => GatewayErrorCode::InvalidEngineResponse,
        }
    }

    /// Safe to retry unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::EngineUnavailable(_))
    }

    /// Message returned to the client. Engine detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::InvalidRequest(_) | GatewayError::PayloadTooLarge { .. } => {
                self.to_string()
            }
            GatewayError::NotFound(_) => "Orchestration instance not found".to_string(),
            GatewayError::EngineUnavailable(_) => {
                "Orchestration engine unavailable, please retry later".to_string()
            }
            GatewayError::InvalidEngineResponse(_) => {
                "Orchestration engine returned an invalid response".to_string()
            }
        }
    }

    /// Render as a JSON error response
    pub fn into_response(self) -> GatewayResponse {
        let mut response = json_error_response(self.code(), self.public_message());
        if self.is_transient() {
            response.headers_mut().insert(
                hyper::header::RETRY_AFTER,
                hyper::header::HeaderValue::from(ENGINE_RETRY_AFTER_SECS),
            );
        }
        response
    }
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unavailable(msg) => GatewayError::EngineUnavailable(msg),
            EngineError::Rejected(msg) => GatewayError::InvalidRequest(msg),
            EngineError::InvalidResponse(msg) => GatewayError::InvalidEngineResponse(msg),
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: GatewayErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Gateway-Error header
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> GatewayResponse {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header(X_GATEWAY_ERROR, code.as_header_value())
        .body(full(body))
        .expect("valid response with StatusCode enum and static headers")
}
