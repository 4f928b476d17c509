//! Status polling
//!
//! In-flight instances answer 202 with a `Location` to poll again. Terminal
//! instances answer 200 whatever the outcome; a failed orchestration is a
//! successfully retrieved status, with the failure in the body.

use crate::engine::call_with_timeout;
use crate::error::GatewayError;
use crate::forwarding::ForwardingContext;
use crate::orchestration::StatusPayload;
use crate::response::{json_response, GatewayResponse};
use crate::rewrite::rewrite;
use crate::state::GatewayState;
use hyper::header::HeaderValue;
use hyper::StatusCode;
use tracing::{debug, warn};

/// Render the current status of `instance_id`
pub async fn get_status(
    state: &GatewayState,
    instance_id: &str,
    ctx: &ForwardingContext,
) -> Result<GatewayResponse, GatewayError> {
    if instance_id.is_empty() {
        return Err(GatewayError::InvalidRequest("missing instance id".to_string()));
    }

    let instance = call_with_timeout(
        state.engine_timeout,
        "status",
        state.engine.get_instance(instance_id),
    )
    .await?
    .ok_or_else(|| GatewayError::NotFound(instance_id.to_string()))?;

    let status = instance.runtime_status;
    debug!(instance_id, status = %status, "Instance status retrieved");

    let payload = StatusPayload::from_instance(&instance);
    if status.is_terminal() {
        return Ok(json_response(StatusCode::OK, &payload));
    }

    let mut response = json_response(StatusCode::ACCEPTED, &payload);
    let location = rewrite(&state.engine.management_uris(instance_id).status_query_get_uri, ctx);
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            response.headers_mut().insert(hyper::header::LOCATION, value);
        }
        Err(_) => warn!(instance_id, "Status URI is not a valid header value, omitting Location"),
    }
    Ok(response)
}
