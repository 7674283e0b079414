//! Cluster queries used during detection and resolution

mod kubernetes;

pub use kubernetes::{deployment_health, helm_release, KubeClusterQuery};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DeploymentHealth, OwnerRef, PodRef};

/// Trait for reading live workload state from the cluster
#[async_trait]
pub trait ClusterQuery: Send + Sync {
    /// Desired/ready replicas and the rollout's tolerated unavailability
    async fn deployment_health(&self, namespace: &str, name: &str) -> Result<DeploymentHealth>;

    /// Resolve the workload controller and Helm release owning a pod
    async fn resolve_owner(&self, pod: &PodRef) -> Result<OwnerRef>;
}
