//! Configuration structures for TriRed
//!
//! The node set is fixed at startup: a list of `(id, address)` pairs loaded
//! from a YAML file, optionally overridden by environment variables.

use crate::error::{Result, TriRedError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the control panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriRedConfig {
    /// Configured inference nodes, in display order
    pub nodes: Vec<NodeConfig>,

    /// Status poll period in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Bound on every outbound node request, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// A single configured node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Stable node identifier
    pub id: u32,

    /// Network endpoint, `host:port` or a full `http://host:port` URL
    pub address: String,
}

impl NodeConfig {
    pub fn new(id: u32, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub structured_logging: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            structured_logging: false,
            enable_metrics: default_metrics(),
        }
    }
}

/// Default value functions
fn default_poll_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl Default for TriRedConfig {
    /// Three local nodes on consecutive ports
    fn default() -> Self {
        Self {
            nodes: (1..=3)
                .map(|id| NodeConfig::new(id, format!("localhost:{}", 50050 + id)))
                .collect(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_ms: default_request_timeout(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl TriRedConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            TriRedError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config = Self::from_yaml(&content).map_err(|e| {
            TriRedError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text without validating it
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| TriRedError::Config(e.to_string()))
    }

    /// Apply `TRIRED_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// `TRIRED_NODES` replaces the node list and takes the form
    /// `1=localhost:50051,2=localhost:50052`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(nodes) = lookup("TRIRED_NODES") {
            self.nodes = parse_node_list(&nodes)?;
        }

        if let Some(secs) = lookup("TRIRED_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = secs.trim().parse().map_err(|_| {
                TriRedError::config(format!("Invalid TRIRED_POLL_INTERVAL_SECS: {}", secs))
            })?;
        }

        if let Some(ms) = lookup("TRIRED_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = ms.trim().parse().map_err(|_| {
                TriRedError::config(format!("Invalid TRIRED_REQUEST_TIMEOUT_MS: {}", ms))
            })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(TriRedError::config("At least one node must be configured"));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(TriRedError::config(format!("Duplicate node id: {}", node.id)));
            }
            if node.address.trim().is_empty() {
                return Err(TriRedError::config(format!(
                    "Node {} has an empty address",
                    node.id
                )));
            }
        }

        if self.poll_interval_secs == 0 {
            return Err(TriRedError::config("poll_interval_secs must be greater than zero"));
        }

        if self.request_timeout_ms == 0 {
            return Err(TriRedError::config("request_timeout_ms must be greater than zero"));
        }

        Ok(())
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_node_list(raw: &str) -> Result<Vec<NodeConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, address) = entry
                .split_once('=')
                .ok_or_else(|| TriRedError::config(format!("Invalid node entry: {}", entry)))?;
            let id = id
                .trim()
                .parse()
                .map_err(|_| TriRedError::config(format!("Invalid node id in entry: {}", entry)))?;
            Ok(NodeConfig::new(id, address.trim()))
        })
        .collect()
}
