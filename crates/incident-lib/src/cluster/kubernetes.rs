//! Kubernetes API backed cluster queries

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Api, Client};
use tracing::debug;

use super::ClusterQuery;
use crate::models::{DeploymentHealth, OwnerKind, OwnerRef, PodRef};

const RELEASE_NAME_ANNOTATION: &str = "meta.helm.sh/release-name";
const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
const CHART_LABEL: &str = "helm.sh/chart";
const REVISION_ANNOTATION: &str = "helm.sh/revision";

/// Kubernetes default for RollingUpdate.maxUnavailable
const DEFAULT_MAX_UNAVAILABLE_PERCENT: i32 = 25;

/// Cluster queries against the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterQuery {
    client: Client,
}

impl KubeClusterQuery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }

    /// API server git version, e.g. `v1.28.3`
    pub async fn server_version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .context("Failed to query API server version")?;
        Ok(info.git_version)
    }

    async fn owner_of_replica_set(&self, namespace: &str, name: &str) -> Result<(OwnerKind, ObjectMeta)> {
        let replica_sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let rs = replica_sets
            .get(name)
            .await
            .with_context(|| format!("Failed to get replicaset {namespace}/{name}"))?;

        match controller_of(&rs.metadata) {
            Some(owner) if owner.kind == "Deployment" => {
                let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployment = deployments
                    .get(&owner.name)
                    .await
                    .with_context(|| format!("Failed to get deployment {namespace}/{}", owner.name))?;
                Ok((OwnerKind::Deployment, deployment.metadata))
            }
            _ => Ok((OwnerKind::ReplicaSet, rs.metadata)),
        }
    }
}

#[async_trait]
impl ClusterQuery for KubeClusterQuery {
    async fn deployment_health(&self, namespace: &str, name: &str) -> Result<DeploymentHealth> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments
            .get(name)
            .await
            .with_context(|| format!("Failed to get deployment {namespace}/{name}"))?;
        Ok(deployment_health(&deployment))
    }

    async fn resolve_owner(&self, pod: &PodRef) -> Result<OwnerRef> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let live = pods
            .get(&pod.name)
            .await
            .with_context(|| format!("Failed to get pod {}/{}", pod.namespace, pod.name))?;

        let (kind, meta) = match controller_of(&live.metadata) {
            Some(owner) if owner.kind == "ReplicaSet" => {
                self.owner_of_replica_set(&pod.namespace, &owner.name).await?
            }
            Some(owner) if owner.kind == "Job" => {
                let jobs: Api<Job> = Api::namespaced(self.client.clone(), &pod.namespace);
                let job = jobs
                    .get(&owner.name)
                    .await
                    .with_context(|| format!("Failed to get job {}/{}", pod.namespace, owner.name))?;
                (OwnerKind::Job, job.metadata)
            }
            Some(owner) => {
                // StatefulSet, DaemonSet and friends keep the pod's own metadata for Helm lookup
                let kind = OwnerKind::from_kind(&owner.kind);
                let mut meta = live.metadata.clone();
                meta.name = Some(owner.name.clone());
                (kind, meta)
            }
            None => (OwnerKind::Pod, live.metadata.clone()),
        };

        let name = meta.name.clone().unwrap_or_else(|| pod.name.clone());
        let (release_name, chart_name) = helm_release(&meta, &name);
        let helm_revision = pod
            .owner
            .as_ref()
            .map(|hint| hint.helm_revision)
            .filter(|rev| *rev > 0)
            .or_else(|| helm_revision(&meta))
            .unwrap_or(0);

        debug!(
            pod = %pod.name,
            namespace = %pod.namespace,
            owner_kind = ?kind,
            owner = %name,
            release = %release_name,
            "Resolved pod owner"
        );

        Ok(OwnerRef {
            kind,
            name,
            namespace: pod.namespace.clone(),
            chart_name,
            release_name,
            helm_revision,
        })
    }
}

/// The controlling owner reference, or the first owner if none is marked
fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    let owners = meta.owner_references.as_ref()?;
    owners
        .iter()
        .find(|o| o.controller == Some(true))
        .or_else(|| owners.first())
}

/// Compute rollout health from a deployment object
pub fn deployment_health(deployment: &Deployment) -> DeploymentHealth {
    let spec = deployment.spec.as_ref();
    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    let max_unavailable = spec
        .and_then(|s| s.strategy.as_ref())
        .filter(|strategy| strategy.type_.as_deref().unwrap_or("RollingUpdate") == "RollingUpdate")
        .map(|strategy| {
            match strategy
                .rolling_update
                .as_ref()
                .and_then(|ru| ru.max_unavailable.as_ref())
            {
                Some(value) => scaled_value(value, desired),
                None => desired * DEFAULT_MAX_UNAVAILABLE_PERCENT / 100,
            }
        })
        .unwrap_or(0);

    DeploymentHealth {
        desired_replicas: desired,
        ready_replicas: ready,
        max_unavailable,
    }
}

/// Resolve an int-or-percent against `total`, rounding percentages down
fn scaled_value(value: &IntOrString, total: i32) -> i32 {
    match value {
        IntOrString::Int(v) => *v,
        IntOrString::String(s) => match s.strip_suffix('%') {
            Some(pct) => pct.trim().parse::<i32>().map(|p| total * p / 100).unwrap_or(0),
            None => s.trim().parse().unwrap_or(0),
        },
    }
}

/// Helm release and chart names recorded on an object
///
/// Falls back to the object name when the object was not installed by Helm.
pub fn helm_release(meta: &ObjectMeta, fallback_name: &str) -> (String, String) {
    let release = lookup(meta.annotations.as_ref(), RELEASE_NAME_ANNOTATION)
        .or_else(|| lookup(meta.labels.as_ref(), INSTANCE_LABEL))
        .unwrap_or(fallback_name)
        .to_string();
    let chart = lookup(meta.labels.as_ref(), CHART_LABEL)
        .unwrap_or_default()
        .to_string();
    (release, chart)
}

fn helm_revision(meta: &ObjectMeta) -> Option<i64> {
    lookup(meta.annotations.as_ref(), REVISION_ANNOTATION).and_then(|v| v.parse().ok())
}

fn lookup<'a>(map: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    map.and_then(|m| m.get(key)).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{
        DeploymentSpec, DeploymentStatus, DeploymentStrategy, RollingUpdateDeployment,
    };

    fn deployment(
        replicas: i32,
        ready: i32,
        strategy: Option<DeploymentStrategy>,
    ) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                strategy,
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(ready),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn rolling(max_unavailable: Option<IntOrString>) -> Option<DeploymentStrategy> {
        Some(DeploymentStrategy {
            type_: Some("RollingUpdate".to_string()),
            rolling_update: Some(RollingUpdateDeployment {
                max_unavailable,
                max_surge: None,
            }),
        })
    }

    #[test]
    fn test_rolling_update_absolute_max_unavailable() {
        let health = deployment_health(&deployment(3, 2, rolling(Some(IntOrString::Int(1)))));
        assert_eq!(health.max_unavailable, 1);
        assert!(!health.is_failing());
    }

    #[test]
    fn test_rolling_update_percentage_rounds_down() {
        let health = deployment_health(&deployment(
            3,
            2,
            rolling(Some(IntOrString::String("50%".to_string()))),
        ));
        assert_eq!(health.max_unavailable, 1);

        let default_pct = deployment_health(&deployment(3, 2, rolling(None)));
        assert_eq!(default_pct.max_unavailable, 0);
        assert!(default_pct.is_failing());
    }

    #[test]
    fn test_recreate_strategy_tolerates_nothing() {
        let strategy = Some(DeploymentStrategy {
            type_: Some("Recreate".to_string()),
            rolling_update: None,
        });
        let health = deployment_health(&deployment(2, 1, strategy));
        assert_eq!(health.max_unavailable, 0);
        assert!(health.is_failing());
    }

    #[test]
    fn test_missing_status_counts_as_not_ready() {
        let mut d = deployment(1, 0, None);
        d.status = None;
        let health = deployment_health(&d);
        assert_eq!(health.ready_replicas, 0);
        assert!(health.is_failing());
    }

    #[test]
    fn test_helm_release_metadata() {
        let mut meta = ObjectMeta::default();
        meta.annotations = Some(BTreeMap::from([(
            RELEASE_NAME_ANNOTATION.to_string(),
            "web".to_string(),
        )]));
        meta.labels = Some(BTreeMap::from([(
            CHART_LABEL.to_string(),
            "web-1.2.0".to_string(),
        )]));

        assert_eq!(
            helm_release(&meta, "web-deploy"),
            ("web".to_string(), "web-1.2.0".to_string())
        );
        assert_eq!(
            helm_release(&ObjectMeta::default(), "web-deploy"),
            ("web-deploy".to_string(), String::new())
        );
    }

    #[test]
    fn test_controller_owner_preferred() {
        let owner = |kind: &str, name: &str, controller: Option<bool>| OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            controller,
            block_owner_deletion: None,
        };
        let meta = ObjectMeta {
            owner_references: Some(vec![
                owner("ConfigMap", "unrelated", None),
                owner("ReplicaSet", "web-7d9f", Some(true)),
            ]),
            ..Default::default()
        };

        assert_eq!(controller_of(&meta).unwrap().name, "web-7d9f");
        assert!(controller_of(&ObjectMeta::default()).is_none());
    }
}
