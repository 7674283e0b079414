//! Component health for the liveness and readiness probes
//!
//! Components report the outcome of each unit of work. A single failure
//! degrades a component; `UNHEALTHY_AFTER` failures in a row mark it
//! unhealthy, which takes the agent out of rotation until the next success.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Consecutive failures before a component counts as unhealthy
pub const UNHEALTHY_AFTER: u32 = 3;

/// Component names for health tracking
pub mod components {
    pub const DETECTOR: &str = "detector";
    pub const RESOLVER: &str = "resolver";
    pub const REPOSITORY: &str = "repository";
    pub const CLUSTER: &str = "cluster";

    pub const ALL: [&str; 4] = [DETECTOR, RESOLVER, REPOSITORY, CLUSTER];
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            updated_at: Utc::now(),
        }
    }

    fn failed(&mut self, message: String) {
        self.consecutive_failures += 1;
        self.status = if self.consecutive_failures >= UNHEALTHY_AFTER {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        self.message = Some(message);
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, ComponentHealth>,
    wired: bool,
}

/// Shared health registry, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every engine component as healthy
    pub async fn register_engine(&self) {
        let mut state = self.state.write().await;
        for name in components::ALL {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    /// A unit of work succeeded; clears any failure streak
    pub async fn record_success(&self, name: &str) {
        let mut state = self.state.write().await;
        state
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// A unit of work failed
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut state = self.state.write().await;
        state
            .components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy)
            .failed(message.into());
    }

    /// Flip once the engine is wired, and back on shutdown
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.wired = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready while wired and no component is unhealthy. Degraded
    /// components keep the agent in rotation.
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.wired {
            return ReadinessResponse {
                ready: false,
                reason: Some("Engine not yet wired".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail(registry: &HealthRegistry, name: &str, times: u32) {
        for _ in 0..times {
            registry.record_failure(name, "backend down").await;
        }
    }

    #[tokio::test]
    async fn test_engine_components_start_healthy() {
        let registry = HealthRegistry::new();
        registry.register_engine().await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), 4);
    }

    #[tokio::test]
    async fn test_failures_escalate_to_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register_engine().await;

        fail(&registry, components::REPOSITORY, UNHEALTHY_AFTER - 1).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::REPOSITORY].consecutive_failures,
            UNHEALTHY_AFTER - 1
        );

        fail(&registry, components::REPOSITORY, 1).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_success_clears_failure_streak() {
        let registry = HealthRegistry::new();
        fail(&registry, components::RESOLVER, UNHEALTHY_AFTER).await;

        registry.record_success(components::RESOLVER).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components[components::RESOLVER].consecutive_failures, 0);
        assert!(health.components[components::RESOLVER].message.is_none());
    }

    #[tokio::test]
    async fn test_readiness_waits_for_wiring() {
        let registry = HealthRegistry::new();
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register_engine().await;
        registry.set_ready(true).await;
        fail(&registry, components::REPOSITORY, UNHEALTHY_AFTER).await;
        fail(&registry, components::CLUSTER, UNHEALTHY_AFTER).await;
        fail(&registry, components::RESOLVER, 1).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Unhealthy: cluster, repository"));
    }
}
