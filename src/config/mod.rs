//! Configuration Module
//!
//! Provides TOML-based configuration for the gateway with support for:
//! - Local and cloud broker links
//! - Live client WebSocket server
//! - Control API
//! - Registry bootstrap units
//! - Environment variable overrides (GATEWAY__* prefix)

use std::net::SocketAddr;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use broker::{qos_from_u8, CloudConfig, CloudTlsConfig, LocalConfig, MQTTS_PORT, MQTT_PORT};

mod broker;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static regex is valid");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Local broker link
    pub local: LocalConfig,
    /// Cloud broker link
    pub cloud: CloudConfig,
    /// Live client WebSocket server
    pub live: LiveConfig,
    /// Control API
    pub api: ApiConfig,
    /// Device registry
    pub registry: RegistryConfig,
    /// Bridge core queues
    pub bridge: BridgeConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Live client WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket bind address
    pub bind: SocketAddr,
    /// Required request path (any path is accepted when unset)
    pub path: Option<String>,
    /// Per-client outbound frame queue capacity; a client whose queue is
    /// full when a broadcast arrives is disconnected
    pub client_queue_capacity: usize,
}

fn default_live_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8765))
}

fn default_client_queue_capacity() -> usize {
    64
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            bind: default_live_bind(),
            path: None,
            client_queue_capacity: default_client_queue_capacity(),
        }
    }
}

/// Control API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Whether the HTTP API is served
    pub enabled: bool,
    /// HTTP bind address
    pub bind: SocketAddr,
}

fn default_api_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_api_bind(),
        }
    }
}

/// Device registry configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// Units listed before they are first heard from (e.g. "INT_WEB")
    pub bootstrap_units: Vec<String>,
}

/// Bridge core configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capacity of each per-domain inbound queue
    pub inbound_capacity: usize,
}

fn default_inbound_capacity() -> usize {
    1024
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `GATEWAY__` prefix with double underscores for nesting:
    ///    - `GATEWAY__LOCAL__ADDRESS=10.0.0.5:1883` overrides `local.address`
    ///    - `GATEWAY__CLOUD__TLS__CA_CERT=/etc/gateway/root-CA.crt` overrides `cloud.tls.ca_cert`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`Config::load`] but without validation, so command line
    /// overrides can be layered on before [`Config::validate`] runs.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("local.address", "localhost:1883")?
            .set_default("local.keepalive", 60)?
            .set_default("local.reconnect_interval", 5)?
            .set_default("local.qos", 0)?
            .set_default("cloud.client_id", "TrafficGateway_Bridge")?
            .set_default("cloud.keepalive", 60)?
            .set_default("cloud.reconnect_interval", 5)?
            .set_default("cloud.qos", 1)?
            .set_default("cloud.heartbeat_interval", "60s")?
            .set_default("live.bind", "0.0.0.0:8765")?
            .set_default("live.client_queue_capacity", 64)?
            .set_default("api.enabled", true)?
            .set_default("api.bind", "0.0.0.0:8090")?
            .set_default("bridge.inbound_capacity", 1024)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

        if self.local.address.is_empty() {
            return invalid("local.address cannot be empty");
        }
        if self.cloud.address.is_empty() {
            return invalid("cloud.address is required");
        }

        for (section, keepalive) in [("local", self.local.keepalive), ("cloud", self.cloud.keepalive)] {
            if keepalive < 5 {
                return Err(ConfigError::Validation(format!(
                    "{}.keepalive must be at least 5 seconds",
                    section
                )));
            }
        }

        for (section, qos) in [("local", self.local.qos), ("cloud", self.cloud.qos)] {
            if qos > 2 {
                return Err(ConfigError::Validation(format!(
                    "{}.qos must be 0, 1, or 2",
                    section
                )));
            }
        }

        if self.local.reconnect_interval == 0 || self.cloud.reconnect_interval == 0 {
            return invalid("reconnect_interval must be at least 1 second");
        }

        if self.local.request_capacity == 0 || self.cloud.request_capacity == 0 {
            return invalid("request_capacity must be greater than 0");
        }

        // Client certificate material is mandatory for the cloud link
        match &self.cloud.tls {
            Some(tls) => {
                if tls.ca_cert.is_empty() {
                    return invalid("cloud.tls.ca_cert is required");
                }
                if tls.client_cert.is_empty() {
                    return invalid("cloud.tls.client_cert is required");
                }
                if tls.client_key.is_empty() {
                    return invalid("cloud.tls.client_key is required");
                }
            }
            None => return invalid("cloud.tls configuration is required"),
        }

        if let Some(path) = &self.live.path {
            if !path.starts_with('/') {
                return invalid("live.path must start with '/'");
            }
        }

        if self.live.client_queue_capacity == 0 {
            return invalid("live.client_queue_capacity must be greater than 0");
        }

        if self.bridge.inbound_capacity == 0 {
            return invalid("bridge.inbound_capacity must be greater than 0");
        }

        for unit in &self.registry.bootstrap_units {
            if crate::topic::UnitId::new(unit).is_err() {
                return Err(ConfigError::Validation(format!(
                    "registry.bootstrap_units contains invalid unit id '{}'",
                    unit
                )));
            }
        }

        Ok(())
    }

    /// Bootstrap units as unit ids (validated by [`Config::validate`])
    pub fn bootstrap_units(&self) -> Vec<crate::topic::UnitId> {
        self.registry
            .bootstrap_units
            .iter()
            .filter_map(|u| crate::topic::UnitId::new(u).ok())
            .collect()
    }
}
