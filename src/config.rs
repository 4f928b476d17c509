use crate::engine::durable::DurableEngine;
use crate::engine::memory::{InMemoryEngine, DEFAULT_CAPACITY};
use crate::engine::{SharedEngine, WebhookUrls};
use crate::forwarding::CustomDomain;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable that overrides `server.custom_domain`
pub const CUSTOM_DOMAIN_ENV: &str = "CUSTOM_DOMAIN";

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Orchestration engine connection
    #[serde(default)]
    pub engine: EngineConfig,

    /// Which orchestrations may be started
    #[serde(default)]
    pub orchestrations: OrchestrationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP port (default: 7071)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Public domain that replaces the authority of every management URI.
    /// Overrides forwarding headers when set.
    pub custom_domain: Option<String>,

    /// Maximum accepted request body size in bytes (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            custom_domain: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Engine type: Durable Task webhook API or in-process
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Durable Task webhook HTTP API (default)
    #[default]
    Durable,
    /// In-process engine for local development
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Engine type: "durable" (default) or "memory"
    #[serde(default, rename = "type")]
    pub engine_type: EngineType,

    /// Base URL of the engine host (default: http://127.0.0.1:7071)
    #[serde(default = "default_engine_base_url")]
    pub base_url: String,

    /// Task hub name, sent as `taskHub`
    pub task_hub: Option<String>,

    /// Storage connection name, sent as `connection`
    pub connection: Option<String>,

    /// System key, sent as `code`
    pub system_key: Option<String>,

    /// Upper bound on each engine call in seconds (default: 10)
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,

    /// Most instances the in-memory engine holds before evicting (default: 10000)
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_type: EngineType::default(),
            base_url: default_engine_base_url(),
            task_hub: None,
            connection: None,
            system_key: None,
            timeout_secs: default_engine_timeout(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn webhook_urls(&self) -> WebhookUrls {
        WebhookUrls::new(
            &self.base_url,
            self.task_hub.as_deref(),
            self.connection.as_deref(),
            self.system_key.as_deref(),
        )
    }

    /// Build the configured engine
    pub fn build(&self) -> anyhow::Result<SharedEngine> {
        let engine: SharedEngine = match self.engine_type {
            EngineType::Durable => Arc::new(DurableEngine::new(self.webhook_urls(), self.timeout())?),
            EngineType::Memory => Arc::new(
                InMemoryEngine::new(self.webhook_urls()).with_capacity(self.memory_capacity),
            ),
        };
        Ok(engine)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OrchestrationsConfig {
    /// Orchestration names that may be started. Empty allows any valid name.
    #[serde(default)]
    pub allowed: Vec<String>,
}

impl OrchestrationsConfig {
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|allowed| allowed == name)
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    7071
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_engine_base_url() -> String {
    "http://127.0.0.1:7071".to_string()
}

fn default_engine_timeout() -> u64 {
    10
}

fn default_memory_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Config {
    /// Load, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`. An empty `CUSTOM_DOMAIN` clears the
    /// configured domain.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(domain) = lookup(CUSTOM_DOMAIN_ENV) {
            let domain = domain.trim();
            self.server.custom_domain = if domain.is_empty() {
                None
            } else {
                Some(domain.to_string())
            };
        }
    }

    /// The parsed custom domain, if configured
    pub fn custom_domain(&self) -> anyhow::Result<Option<CustomDomain>> {
        self.server
            .custom_domain
            .as_deref()
            .map(|d| d.parse::<CustomDomain>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("server.custom_domain: {}", e))
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.custom_domain() {
            errors.push(e.to_string());
        }

        if self.server.max_body_bytes == 0 {
            errors.push("server.max_body_bytes must be greater than 0".to_string());
        }

        if self.engine.timeout_secs == 0 {
            errors.push("engine.timeout_secs must be greater than 0".to_string());
        }

        if self.engine.engine_type == EngineType::Memory && self.engine.memory_capacity == 0 {
            errors.push("engine.memory_capacity must be greater than 0".to_string());
        }

        if self.engine.engine_type == EngineType::Durable
            && crate::rewrite::ParsedUri::parse(&self.engine.base_url).is_none()
        {
            errors.push(format!(
                "engine.base_url is not an absolute URL: {}",
                self.engine.base_url
            ));
        }

        for name in &self.orchestrations.allowed {
            if !crate::launcher::is_valid_orchestration_name(name) {
                errors.push(format!("orchestrations.allowed: invalid name '{}'", name));
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }

    /// Settings that are valid but probably not what was intended
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        match self.engine.engine_type {
            EngineType::Durable if self.engine.system_key.is_none() => {
                warnings.push(
                    "engine.system_key is not set: management URIs will carry no `code` \
                     parameter and the engine will reject clients that use them"
                        .to_string(),
                );
            }
            EngineType::Memory => {
                warnings.push(format!(
                    "engine.type is memory: instances never run and at most {} are kept",
                    self.engine.memory_capacity
                ));
            }
            EngineType::Durable => {}
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 8080
bind = "127.0.0.1"
custom_domain = "api.example.com"

[engine]
type = "durable"
base_url = "http://functions.internal:7071"
task_hub = "TestHubName"
connection = "Storage"
system_key = "abc=="
timeout_secs = 3

[orchestrations]
allowed = ["HelloOrchestrator", "hello_orchestrator"]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.custom_domain.as_deref(), Some("api.example.com"));
        assert_eq!(config.engine.engine_type, EngineType::Durable);
        assert_eq!(config.engine.task_hub.as_deref(), Some("TestHubName"));
        assert_eq!(config.engine.timeout(), Duration::from_secs(3));
        assert_eq!(config.orchestrations.allowed.len(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 7071);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.max_body_bytes, 1024 * 1024);
        assert_eq!(config.engine.engine_type, EngineType::Durable);
        assert_eq!(config.engine.base_url, "http://127.0.0.1:7071");
        assert_eq!(config.engine.timeout_secs, 10);
        assert!(config.orchestrations.allowed.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_memory_engine_type() {
        let config: Config = toml::from_str("[engine]\ntype = \"memory\"\n").unwrap();
        assert_eq!(config.engine.engine_type, EngineType::Memory);
        assert!(config.engine.build().is_ok());
    }

    #[test]
    fn test_memory_capacity() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.memory_capacity, DEFAULT_CAPACITY);

        let config: Config =
            toml::from_str("[engine]\ntype = \"memory\"\nmemory_capacity = 0\n").unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("engine.memory_capacity"));
    }

    #[test]
    fn test_warns_when_durable_engine_has_no_system_key() {
        let config: Config = toml::from_str("").unwrap();
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("engine.system_key"));

        let config: Config = toml::from_str("[engine]\nsystem_key = \"abc\"\n").unwrap();
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_warns_about_memory_engine() {
        let config: Config =
            toml::from_str("[engine]\ntype = \"memory\"\nmemory_capacity = 5\n").unwrap();
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("at most 5"));
    }

    #[test]
    fn test_allow_list() {
        let open = OrchestrationsConfig::default();
        assert!(open.is_allowed("Anything"));

        let closed = OrchestrationsConfig {
            allowed: vec!["HelloOrchestrator".to_string()],
        };
        assert!(closed.is_allowed("HelloOrchestrator"));
        assert!(!closed.is_allowed("helloorchestrator"));
    }

    #[test]
    fn test_env_overrides_custom_domain() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("CUSTOM_DOMAIN", "example.com")]));
        assert_eq!(config.server.custom_domain.as_deref(), Some("example.com"));
        assert_eq!(
            config.custom_domain().unwrap().unwrap().authority(),
            "example.com"
        );
    }

    #[test]
    fn test_empty_env_clears_custom_domain() {
        let mut config = Config::default();
        config.server.custom_domain = Some("file.example.com".to_string());
        config.apply_env_overrides(env(&[("CUSTOM_DOMAIN", "  ")]));
        assert_eq!(config.server.custom_domain, None);
    }

    #[test]
    fn test_unset_env_keeps_file_value() {
        let mut config = Config::default();
        config.server.custom_domain = Some("file.example.com".to_string());
        config.apply_env_overrides(env(&[]));
        assert_eq!(config.server.custom_domain.as_deref(), Some("file.example.com"));
    }

    #[test]
    fn test_validate_multiple_errors() {
        let mut config = Config::default();
        config.server.custom_domain = Some("bad domain/with path".to_string());
        config.server.max_body_bytes = 0;
        config.engine.timeout_secs = 0;
        config.engine.base_url = "not-a-url".to_string();
        config.orchestrations.allowed = vec!["bad name".to_string()];

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("server.custom_domain"));
        assert!(err.contains("max_body_bytes"));
        assert!(err.contains("timeout_secs"));
        assert!(err.contains("engine.base_url"));
        assert!(err.contains("bad name"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9090\n\n[engine]\ntype = \"memory\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.engine.engine_type, EngineType::Memory);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
