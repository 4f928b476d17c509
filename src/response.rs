//! Response construction helpers

use crate::error::{json_error_response, GatewayErrorCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

/// Response type produced by every gateway handler
pub type GatewayResponse = Response<BoxBody<Bytes, hyper::Error>>;

pub fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}

/// Helper to create a plain-text response - infallible with valid StatusCode
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> GatewayResponse {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(full(body))
        .expect("valid response with StatusCode enum and static header")
}

/// Helper to create a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> GatewayResponse {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(full(body))
            .expect("valid response with StatusCode enum and static header"),
        Err(e) => {
            error!(error = %e, "Failed to serialize response body");
            json_error_response(GatewayErrorCode::InternalError, "Failed to render response")
        }
    }
}
