//! In-process engine
//!
//! Instances live in a concurrent map and only change state through
//! [`InMemoryEngine::transition`]. Nothing executes; the engine exists so the
//! gateway can be exercised end to end without a Durable host.
//!
//! The map is bounded: once `capacity` instances are held, starting another
//! evicts the least recently updated one, terminal instances first.

use super::{EngineError, OrchestrationEngine, WebhookUrls};
use crate::orchestration::{ManagementUriSet, OrchestrationInstance, RuntimeStatus};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default bound on the number of instances held
pub const DEFAULT_CAPACITY: usize = 10_000;

pub struct InMemoryEngine {
    instances: DashMap<String, OrchestrationInstance>,
    urls: WebhookUrls,
    capacity: usize,
    /// Artificial delay before every engine call
    latency: Option<Duration>,
}

impl InMemoryEngine {
    pub fn new(urls: WebhookUrls) -> Self {
        Self {
            instances: DashMap::new(),
            urls,
            capacity: DEFAULT_CAPACITY,
            latency: None,
        }
    }

    /// Hold at most `capacity` instances (at least one)
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Delay every call, to exercise caller timeouts
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Move an instance to `status`. Returns false for unknown ids.
    pub fn transition(
        &self,
        instance_id: &str,
        status: RuntimeStatus,
        output: Option<serde_json::Value>,
    ) -> bool {
        match self.instances.get_mut(instance_id) {
            Some(mut instance) => {
                instance.runtime_status = status;
                instance.output = output;
                instance.last_updated_time = Utc::now();
                debug!(instance_id, status = %status, "Instance transitioned");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop instances until there is room for one more
    fn make_room(&self) {
        while self.instances.len() >= self.capacity {
            let victim = self
                .instances
                .iter()
                .min_by_key(|entry| {
                    let instance = entry.value();
                    (!instance.runtime_status.is_terminal(), instance.last_updated_time)
                })
                .map(|entry| entry.key().clone());

            match victim {
                Some(instance_id) => {
                    warn!(instance_id = %instance_id, capacity = self.capacity, "In-memory engine full, evicting instance");
                    self.instances.remove(&instance_id);
                }
                None => break,
            }
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl OrchestrationEngine for InMemoryEngine {
    async fn start_instance(
        &self,
        name: &str,
        input: Option<serde_json::Value>,
    ) -> Result<String, EngineError> {
        self.simulate_latency().await;
        self.make_room();

        let instance_id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        self.instances.insert(
            instance_id.clone(),
            OrchestrationInstance {
                instance_id: instance_id.clone(),
                name: name.to_string(),
                runtime_status: RuntimeStatus::Pending,
                input,
                output: None,
                created_time: now,
                last_updated_time: now,
            },
        );

        debug!(instance_id = %instance_id, name, "Instance created");
        Ok(instance_id)
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<OrchestrationInstance>, EngineError> {
        self.simulate_latency().await;
        Ok(self.instances.get(instance_id).map(|i| i.value().clone()))
    }

    fn management_uris(&self, instance_id: &str) -> ManagementUriSet {
        self.urls.management_uris(instance_id)
    }
}
