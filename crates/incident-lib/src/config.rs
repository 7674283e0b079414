//! Engine configuration with production defaults

use std::time::Duration;

use crate::store::DEFAULT_PAGE_SIZE;

/// Default cluster minor version used when the API server is not queried
pub const DEFAULT_CLUSTER_VERSION: &str = "1.28";

/// Tunable thresholds for detection, resolution and alert cadence
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cluster version selecting the rule table
    pub cluster_version: String,
    /// Quiet period before a critical deployment incident is health-checked
    pub buffer_window: chrono::Duration,
    /// Quiet period after which non-critical-deployment incidents resolve
    pub settle_after: chrono::Duration,
    /// Consecutive healthy sweeps required to resolve a critical deployment incident
    pub resolved_retry_threshold: u32,
    /// Hour-floored re-alert interval for critical incidents
    pub critical_realert_hours: i64,
    /// Hour-floored re-alert interval for normal incidents
    pub normal_realert_hours: i64,
    /// Deadline for each call into the cluster
    pub cluster_query_timeout: Duration,
    /// Page size used when scanning active incidents
    pub list_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_version: DEFAULT_CLUSTER_VERSION.to_string(),
            buffer_window: chrono::Duration::minutes(6),
            settle_after: chrono::Duration::hours(23),
            resolved_retry_threshold: 3,
            critical_realert_hours: 1,
            normal_realert_hours: 24,
            cluster_query_timeout: Duration::from_secs(10),
            list_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn with_cluster_version(mut self, version: impl Into<String>) -> Self {
        self.cluster_version = version.into();
        self
    }

    pub fn with_cluster_query_timeout(mut self, timeout: Duration) -> Self {
        self.cluster_query_timeout = timeout;
        self
    }
}
