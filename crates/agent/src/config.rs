//! Agent configuration

use std::time::Duration;

use anyhow::Result;
use incident_lib::config::{EngineConfig, DEFAULT_CLUSTER_VERSION};
use serde::Deserialize;

/// Agent configuration, read from `INCIDENT_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for events, incidents, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Cluster version selecting the rule table. Detected from the API
    /// server when unset.
    #[serde(default)]
    pub cluster_version: Option<String>,

    /// Resolver sweep interval in seconds
    #[serde(default = "default_resolve_interval")]
    pub resolve_interval_secs: u64,

    /// Deadline for one resolver sweep in seconds
    #[serde(default = "default_sweep_timeout")]
    pub sweep_timeout_secs: u64,

    /// Deadline for each cluster query in seconds
    #[serde(default = "default_cluster_query_timeout")]
    pub cluster_query_timeout_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_resolve_interval() -> u64 {
    60
}

fn default_sweep_timeout() -> u64 {
    45
}

fn default_cluster_query_timeout() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            cluster_version: None,
            resolve_interval_secs: default_resolve_interval(),
            sweep_timeout_secs: default_sweep_timeout(),
            cluster_query_timeout_secs: default_cluster_query_timeout(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("INCIDENT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn resolve_interval(&self) -> Duration {
        Duration::from_secs(self.resolve_interval_secs)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_secs(self.sweep_timeout_secs)
    }

    /// Engine settings for the given cluster version; `None` falls back to
    /// the configured version, then the built-in default.
    pub fn engine_config(&self, detected_version: Option<String>) -> EngineConfig {
        let version = self
            .cluster_version
            .clone()
            .or(detected_version)
            .unwrap_or_else(|| DEFAULT_CLUSTER_VERSION.to_string());

        EngineConfig::default()
            .with_cluster_version(version)
            .with_cluster_query_timeout(Duration::from_secs(self.cluster_query_timeout_secs))
    }
}
