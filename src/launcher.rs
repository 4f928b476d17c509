//! Starting orchestration instances

use crate::engine::call_with_timeout;
use crate::error::GatewayError;
use crate::forwarding::ForwardingContext;
use crate::orchestration::{CheckStatusPayload, ManagementUriSet};
use crate::response::{json_response, GatewayResponse};
use crate::state::GatewayState;
use hyper::header::HeaderValue;
use hyper::StatusCode;
use tracing::{info, warn};

/// Maximum orchestration name length
const MAX_NAME_LEN: usize = 128;

/// A freshly started instance and its client-facing management URIs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub instance_id: String,
    pub uris: ManagementUriSet,
}

impl Started {
    /// 202 Accepted with `Location` and the check-status payload
    pub fn into_response(self) -> GatewayResponse {
        let payload = CheckStatusPayload {
            id: &self.instance_id,
            uris: &self.uris,
        };
        let mut response = json_response(StatusCode::ACCEPTED, &payload);

        match HeaderValue::from_str(&self.uris.location) {
            Ok(location) => {
                response.headers_mut().insert(hyper::header::LOCATION, location);
            }
            Err(_) => {
                warn!(instance_id = %self.instance_id, "Location is not a valid header value, omitting");
            }
        }
        response
    }
}

/// Names are ASCII alphanumerics plus `_`, `-` and `.`
pub fn is_valid_orchestration_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Start `name` on the engine and build its rewritten management URIs.
///
/// One engine call bounded by the configured timeout; no polling.
pub async fn start(
    state: &GatewayState,
    name: &str,
    input: Option<serde_json::Value>,
    ctx: &ForwardingContext,
) -> Result<Started, GatewayError> {
    if !is_valid_orchestration_name(name) {
        return Err(GatewayError::InvalidRequest(format!(
            "invalid orchestration name '{}'",
            name.escape_default()
        )));
    }
    if !state.orchestrations.is_allowed(name) {
        return Err(GatewayError::InvalidRequest(format!(
            "unsupported orchestration '{}'",
            name
        )));
    }

    let instance_id = call_with_timeout(
        state.engine_timeout,
        "start",
        state.engine.start_instance(name, input),
    )
    .await?;

    let uris = state.engine.management_uris(&instance_id).rewritten(ctx);

    info!(
        orchestration = name,
        instance_id = %instance_id,
        status_uri = %uris.status_query_get_uri,
        "Started orchestration"
    );

    Ok(Started { instance_id, uris })
}
