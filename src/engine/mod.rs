//! The orchestration engine seam
//!
//! The gateway never executes orchestrations itself. It talks to an engine
//! through [`OrchestrationEngine`], and each adapter is the only place that
//! knows its engine's wire shapes:
//!
//! - [`durable::DurableEngine`] calls the Durable Task webhook HTTP API
//! - [`memory::InMemoryEngine`] keeps instances in process, for tests and
//!   local development

pub mod durable;
pub mod memory;

use crate::orchestration::{ManagementUriSet, OrchestrationInstance};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Path prefix of the Durable Task webhook API
pub const WEBHOOK_PREFIX: &str = "/runtime/webhooks/durabletask";

/// Failures talking to an engine
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    /// Transport failure, timeout or engine-side outage; safe to retry
    #[error("{0}")]
    Unavailable(String),

    /// The engine refused the request itself, e.g. an orchestration it does
    /// not host
    #[error("{0}")]
    Rejected(String),

    /// The engine answered, but not with anything usable
    #[error("{0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait OrchestrationEngine: Send + Sync {
    /// Schedule a new instance of `name` and return its engine-assigned id
    async fn start_instance(
        &self,
        name: &str,
        input: Option<serde_json::Value>,
    ) -> Result<String, EngineError>;

    /// Current state of an instance, `None` if the engine does not know it
    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<OrchestrationInstance>, EngineError>;

    /// The engine's own management URIs for an instance, before rewriting
    fn management_uris(&self, instance_id: &str) -> ManagementUriSet;
}

pub type SharedEngine = Arc<dyn OrchestrationEngine>;

/// Run an engine call under `timeout`. Elapsing is an outage, not an answer:
/// the instance state is unknown and the caller may retry.
pub async fn call_with_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "Engine call timed out");
            Err(EngineError::Unavailable(format!(
                "{} timed out after {}ms",
                operation,
                timeout.as_millis()
            )))
        }
    }
}

/// Builds webhook-API URLs rooted at an engine base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookUrls {
    base_url: String,
    /// Pre-encoded `taskHub`/`connection`/`code` parameters, without `?`
    common_query: String,
}

impl WebhookUrls {
    pub fn new(
        base_url: &str,
        task_hub: Option<&str>,
        connection: Option<&str>,
        system_key: Option<&str>,
    ) -> Self {
        let common_query = [
            ("taskHub", task_hub),
            ("connection", connection),
            ("code", system_key),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, urlencoding::encode(v))))
        .collect::<Vec<_>>()
        .join("&");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            common_query,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST` target that starts `name`
    pub fn start_url(&self, name: &str) -> String {
        self.with_query(format!(
            "{}{}/orchestrators/{}",
            self.base_url,
            WEBHOOK_PREFIX,
            urlencoding::encode(name)
        ))
    }

    /// `GET` target for an instance's status (also its purge target)
    pub fn instance_url(&self, instance_id: &str) -> String {
        self.with_query(self.instance_path(instance_id))
    }

    pub fn management_uris(&self, instance_id: &str) -> ManagementUriSet {
        let instance = self.instance_path(instance_id);
        let status = self.with_query(instance.clone());

        let terminate = if self.common_query.is_empty() {
            format!("{}/terminate?reason={{text}}", instance)
        } else {
            format!("{}/terminate?reason={{text}}&{}", instance, self.common_query)
        };

        ManagementUriSet {
            send_event_post_uri: self.with_query(format!("{}/raiseEvent/{{eventName}}", instance)),
            terminate_post_uri: terminate,
            purge_history_delete_uri: status.clone(),
            location: status.clone(),
            status_query_get_uri: status,
        }
    }

    fn instance_path(&self, instance_id: &str) -> String {
        format!(
            "{}{}/instances/{}",
            self.base_url,
            WEBHOOK_PREFIX,
            urlencoding::encode(instance_id)
        )
    }

    fn with_query(&self, url: String) -> String {
        if self.common_query.is_empty() {
            url
        } else {
            format!("{}?{}", url, self.common_query)
        }
    }
}
