//! Configuration module for the cluster client
//!
//! Supports YAML configuration files with section-based organization

use serde::{Deserialize, Serialize};
use std::time::Duration;

use rr_core::Endpoint;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterClientConfig {
    /// Seed nodes used for the initial topology discovery
    #[serde(default)]
    pub seeds: Vec<SeedConfig>,
    /// Topology refresh configuration
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl ClusterClientConfig {
    /// Config with the given seeds and default settings
    pub fn with_seeds(seeds: Vec<SeedConfig>) -> Self {
        Self {
            seeds,
            ..Default::default()
        }
    }

    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: ClusterClientConfig) {
        if !other.seeds.is_empty() {
            self.seeds = other.seeds;
        }
        self.topology.merge(other.topology);
        self.connection.merge(other.connection);
        self.log.merge(other.log);
    }

    /// Check that the configuration can drive a client
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::Invalid("at least one seed is required".into()));
        }
        if let Some(seed) = self.seeds.iter().find(|s| s.host.is_empty() || s.port == 0) {
            return Err(ConfigError::Invalid(format!(
                "invalid seed address {}:{}",
                seed.host, seed.port
            )));
        }
        if self.topology.refresh_period_secs == 0 {
            return Err(ConfigError::Invalid("refresh_period_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Seed endpoints in configuration order
    pub fn seed_endpoints(&self) -> Vec<Endpoint> {
        self.seeds
            .iter()
            .map(|seed| {
                let endpoint = Endpoint::new(seed.host.clone(), seed.port)
                    .with_timeout(self.connection.connect_timeout());
                match &seed.password {
                    Some(password) => endpoint.with_password(password.clone()),
                    None => endpoint,
                }
            })
            .collect()
    }
}

/// Seed node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedConfig {
    pub host: String,
    pub port: u16,
    /// Password sent with AUTH (optional)
    #[serde(default)]
    pub password: Option<String>,
}

impl SeedConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }
}

/// Topology refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Periodically re-read the cluster view
    #[serde(default)]
    pub refresh_cluster_view: bool,
    /// Refresh period in seconds
    #[serde(default = "default_refresh_period_secs")]
    pub refresh_period_secs: u64,
    /// Per-endpoint discovery timeout in milliseconds
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            refresh_cluster_view: false,
            refresh_period_secs: default_refresh_period_secs(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl TopologyConfig {
    fn merge(&mut self, other: Self) {
        if other.refresh_cluster_view {
            self.refresh_cluster_view = true;
        }
        if other.refresh_period_secs > 0 {
            self.refresh_period_secs = other.refresh_period_secs;
        }
        if other.discovery_timeout_ms > 0 {
            self.discovery_timeout_ms = other.discovery_timeout_ms;
        }
    }

    /// Get refresh period as Duration
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }

    /// Get discovery timeout as Duration
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Command timeout in milliseconds (0 = use the first seed's timeout)
    #[serde(default)]
    pub command_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: 0,
        }
    }
}

impl ConnectionConfig {
    fn merge(&mut self, other: Self) {
        if other.connect_timeout_ms > 0 {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
        if other.command_timeout_ms > 0 {
            self.command_timeout_ms = other.command_timeout_ms;
        }
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get command timeout, if configured
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_refresh_period_secs() -> u64 {
    60
}

fn default_discovery_timeout_ms() -> u64 {
    1000 // 1 second
}

fn default_connect_timeout_ms() -> u64 {
    10000 // 10 seconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
