//! Process-wide gateway state, built once at startup and shared read-only

use crate::config::{Config, OrchestrationsConfig};
use crate::engine::SharedEngine;
use crate::forwarding::{CustomDomain, ForwardingContext};
use hyper::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request handler needs besides the request itself
pub struct GatewayState {
    pub engine: SharedEngine,
    pub custom_domain: Option<CustomDomain>,
    pub orchestrations: OrchestrationsConfig,
    pub engine_timeout: Duration,
    pub max_body_bytes: usize,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// State with default limits and no custom domain
    pub fn new(engine: SharedEngine) -> Self {
        let defaults = Config::default();
        Self {
            engine,
            custom_domain: None,
            orchestrations: defaults.orchestrations,
            engine_timeout: defaults.engine.timeout(),
            max_body_bytes: defaults.server.max_body_bytes,
        }
    }

    /// Build the engine and state described by `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            engine: config.engine.build()?,
            custom_domain: config.custom_domain()?,
            orchestrations: config.orchestrations.clone(),
            engine_timeout: config.engine.timeout(),
            max_body_bytes: config.server.max_body_bytes,
        })
    }

    pub fn with_custom_domain(mut self, domain: CustomDomain) -> Self {
        self.custom_domain = Some(domain);
        self
    }

    pub fn with_allowed_orchestrations(mut self, allowed: Vec<String>) -> Self {
        self.orchestrations = OrchestrationsConfig { allowed };
        self
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Resolve the forwarding context for one request
    pub fn forwarding_context(&self, headers: &HeaderMap) -> ForwardingContext {
        ForwardingContext::resolve(headers, self.custom_domain.as_ref())
    }
}
