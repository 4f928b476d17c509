//! Orchestration instances, runtime status and management URI payloads
//!
//! These are the gateway's own representations. Engine adapters translate
//! whatever their engine returns into these types; nothing above the engine
//! layer sees an engine-specific shape.

use crate::forwarding::ForwardingContext;
use crate::rewrite::rewrite;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an orchestration instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeStatus {
    /// Scheduled but not yet picked up by the engine
    Pending,
    /// Executing
    Running,
    /// Finished successfully; output holds the result
    Completed,
    /// Finished with an error; output holds the failure detail
    Failed,
    /// Stopped through the terminate management URI
    Terminated,
    /// Cancelled by the engine
    Canceled,
}

impl RuntimeStatus {
    pub const ALL: [RuntimeStatus; 6] = [
        RuntimeStatus::Pending,
        RuntimeStatus::Running,
        RuntimeStatus::Completed,
        RuntimeStatus::Failed,
        RuntimeStatus::Terminated,
        RuntimeStatus::Canceled,
    ];

    /// Whether the instance will never change state again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RuntimeStatus::Pending | RuntimeStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Pending => "Pending",
            RuntimeStatus::Running => "Running",
            RuntimeStatus::Completed => "Completed",
            RuntimeStatus::Failed => "Failed",
            RuntimeStatus::Terminated => "Terminated",
            RuntimeStatus::Canceled => "Canceled",
        }
    }

    /// Parse an engine status name (case-insensitive).
    ///
    /// Engine states outside the gateway's fixed set are folded onto it:
    /// `ContinuedAsNew` and `Suspended` instances are still alive, so they
    /// report as `Running`. `Cancelled` is accepted as a spelling of `Canceled`.
    pub fn from_engine(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" | "continuedasnew" | "suspended" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "terminated" => Some(Self::Terminated),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of an orchestration, as last reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationInstance {
    pub instance_id: String,
    pub name: String,
    pub runtime_status: RuntimeStatus,
    /// Input the instance was started with
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    /// Result for `Completed`, failure detail for the other terminal states
    pub output: Option<serde_json::Value>,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
}

/// The control and query URIs for one instance.
///
/// `location` is where a client is redirected after starting the instance.
/// It is sent as the `Location` header and is not part of the JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementUriSet {
    pub status_query_get_uri: String,
    pub send_event_post_uri: String,
    pub terminate_post_uri: String,
    pub purge_history_delete_uri: String,
    #[serde(skip)]
    pub location: String,
}

impl ManagementUriSet {
    /// Rewrite every URI in the set against the same forwarding context
    pub fn rewritten(&self, ctx: &ForwardingContext) -> Self {
        Self {
            status_query_get_uri: rewrite(&self.status_query_get_uri, ctx),
            send_event_post_uri: rewrite(&self.send_event_post_uri, ctx),
            terminate_post_uri: rewrite(&self.terminate_post_uri, ctx),
            purge_history_delete_uri: rewrite(&self.purge_history_delete_uri, ctx),
            location: rewrite(&self.location, ctx),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            self.status_query_get_uri.as_str(),
            self.send_event_post_uri.as_str(),
            self.terminate_post_uri.as_str(),
            self.purge_history_delete_uri.as_str(),
            self.location.as_str(),
        ]
        .into_iter()
    }
}

/// Body of the 202 returned when an instance is started
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusPayload<'a> {
    pub id: &'a str,
    #[serde(flatten)]
    pub uris: &'a ManagementUriSet,
}

/// Body of a status poll response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload<'a> {
    pub runtime_status: RuntimeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<&'a serde_json::Value>,
}

impl<'a> StatusPayload<'a> {
    /// Project an instance onto the status contract: in-flight instances
    /// report their id for correlation, terminal ones report their output.
    pub fn from_instance(instance: &'a OrchestrationInstance) -> Self {
        if instance.runtime_status.is_terminal() {
            Self {
                runtime_status: instance.runtime_status,
                instance_id: None,
                output: instance.output.as_ref(),
            }
        } else {
            Self {
                runtime_status: instance.runtime_status,
                instance_id: Some(&instance.instance_id),
                output: None,
            }
        }
    }
}
