//! Client for the Durable Task webhook HTTP API

use super::{EngineError, OrchestrationEngine, WebhookUrls};
use crate::orchestration::{ManagementUriSet, OrchestrationInstance, RuntimeStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Engine reached over the Durable Task webhook API
pub struct DurableEngine {
    http_client: reqwest::Client,
    urls: WebhookUrls,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    instance_id: String,
    #[serde(default)]
    name: String,
    runtime_status: String,
    #[serde(default)]
    input: Option<serde_json::Value>,
    #[serde(default)]
    output: Option<serde_json::Value>,
    created_time: Option<DateTime<Utc>>,
    last_updated_time: Option<DateTime<Utc>>,
}

impl StatusResponse {
    fn into_instance(self) -> Result<OrchestrationInstance, EngineError> {
        let runtime_status = RuntimeStatus::from_engine(&self.runtime_status).ok_or_else(|| {
            EngineError::InvalidResponse(format!("unknown runtime status: {}", self.runtime_status))
        })?;
        let created_time = self.created_time.unwrap_or_else(Utc::now);

        Ok(OrchestrationInstance {
            instance_id: self.instance_id,
            name: self.name,
            runtime_status,
            input: self.input,
            output: self.output,
            created_time,
            last_updated_time: self.last_updated_time.unwrap_or(created_time),
        })
    }
}

impl DurableEngine {
    /// `timeout` bounds each HTTP exchange with the engine
    pub fn new(urls: WebhookUrls, timeout: Duration) -> Result<Self, EngineError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client, urls })
    }

    pub fn urls(&self) -> &WebhookUrls {
        &self.urls
    }
}

#[async_trait]
impl OrchestrationEngine for DurableEngine {
    async fn start_instance(
        &self,
        name: &str,
        input: Option<serde_json::Value>,
    ) -> Result<String, EngineError> {
        let url = self.urls.start_url(name);
        debug!(name, "Starting orchestration via webhook API");

        let mut request = self.http_client.post(&url);
        if let Some(input) = &input {
            request = request.json(input);
        }
        let response = request.send().await.map_err(transport_error)?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::CREATED => {
                let started: StartResponse = response.json().await.map_err(transport_error)?;
                Ok(started.id)
            }
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                debug!(name, status = %response.status(), "Engine rejected start request");
                Err(EngineError::Rejected(format!(
                    "orchestration '{}' was rejected by the engine",
                    name
                )))
            }
            status => Err(unexpected_status(status, "start")),
        }
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<OrchestrationInstance>, EngineError> {
        let url = self.urls.instance_url(instance_id);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK | StatusCode::ACCEPTED => {
                let status: StatusResponse = response.json().await.map_err(transport_error)?;
                status.into_instance().map(Some)
            }
            status => Err(unexpected_status(status, "status")),
        }
    }

    fn management_uris(&self, instance_id: &str) -> ManagementUriSet {
        self.urls.management_uris(instance_id)
    }
}

fn transport_error(err: reqwest::Error) -> EngineError {
    if err.is_decode() {
        EngineError::InvalidResponse(format!("undecodable engine response: {}", err))
    } else {
        EngineError::Unavailable(err.to_string())
    }
}

/// Engine-side 5xx is an outage; anything else is a contract violation
fn unexpected_status(status: StatusCode, operation: &str) -> EngineError {
    if status.is_server_error() {
        EngineError::Unavailable(format!("engine returned {} for {}", status, operation))
    } else {
        EngineError::InvalidResponse(format!("engine returned {} for {}", status, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_response_parsing() {
        let json = r#"{
            "name": "HelloOrchestrator",
            "instanceId": "abc",
            "runtimeStatus": "Completed",
            "input": null,
            "customStatus": null,
            "output": "Hello, World!",
            "createdTime": "2024-05-01T10:00:00Z",
            "lastUpdatedTime": "2024-05-01T10:00:03Z"
        }"#;

        let response: StatusResponse = serde_json::from_str(json).unwrap();
        let instance = response.into_instance().unwrap();

        assert_eq!(instance.instance_id, "abc");
        assert_eq!(instance.runtime_status, RuntimeStatus::Completed);
        assert_eq!(instance.input, None);
        assert_eq!(instance.output, Some(serde_json::json!("Hello, World!")));
        assert!(instance.last_updated_time > instance.created_time);
    }

    #[test]
    fn test_status_response_null_output() {
        let json = r#"{"instanceId":"abc","runtimeStatus":"Running","output":null}"#;
        let response: StatusResponse = serde_json::from_str(json).unwrap();
        let instance = response.into_instance().unwrap();

        assert_eq!(instance.runtime_status, RuntimeStatus::Running);
        assert_eq!(instance.output, None);
        assert_eq!(instance.created_time, instance.last_updated_time);
    }

    #[test]
    fn test_status_response_keeps_input() {
        let json = r#"{"instanceId":"abc","runtimeStatus":"Pending","input":["Tokyo","Seattle"]}"#;
        let response: StatusResponse = serde_json::from_str(json).unwrap();
        let instance = response.into_instance().unwrap();
        assert_eq!(instance.input, Some(serde_json::json!(["Tokyo", "Seattle"])));
    }

    #[test]
    fn test_status_response_unknown_status() {
        let json = r#"{"instanceId":"abc","runtimeStatus":"Exploded"}"#;
        let response: StatusResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(
            response.into_instance(),
            Err(EngineError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_unexpected_status_classification() {
        assert!(matches!(
            unexpected_status(StatusCode::SERVICE_UNAVAILABLE, "status"),
            EngineError::Unavailable(_)
        ));
        assert!(matches!(
            unexpected_status(StatusCode::CONFLICT, "start"),
            EngineError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_management_uris_delegate_to_urls() {
        let urls = WebhookUrls::new("http://localhost:7071", Some("Hub"), None, None);
        let engine = DurableEngine::new(urls.clone(), Duration::from_secs(5)).unwrap();
        assert_eq!(engine.management_uris("abc"), urls.management_uris("abc"));
    }
}
