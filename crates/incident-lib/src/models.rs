//! Core data models for the incident engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Severity bucket assigned by the upstream event normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBucket {
    Critical,
    High,
    Low,
}

/// Where a normalized event was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSourceKind {
    /// Container status on the pod object
    Pod,
    /// A cluster `Event` object
    Event,
}

/// Incident severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Normal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Normal => write!(f, "normal"),
        }
    }
}

/// Incident lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Resolved,
}

/// Workload granularity an incident is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Deployment,
    Job,
    Pod,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Deployment => write!(f, "Deployment"),
            ObjectKind::Job => write!(f, "Job"),
            ObjectKind::Pod => write!(f, "Pod"),
        }
    }
}

/// Kind of the controller owning a pod, as reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    Deployment,
    Job,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Pod,
    Other(String),
}

impl OwnerKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Deployment" => OwnerKind::Deployment,
            "Job" => OwnerKind::Job,
            "ReplicaSet" => OwnerKind::ReplicaSet,
            "StatefulSet" => OwnerKind::StatefulSet,
            "DaemonSet" => OwnerKind::DaemonSet,
            "Pod" => OwnerKind::Pod,
            other => OwnerKind::Other(other.to_string()),
        }
    }

    /// Incident scope an owner of this kind maps to when promoted
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            OwnerKind::Deployment => ObjectKind::Deployment,
            OwnerKind::Job => ObjectKind::Job,
            _ => ObjectKind::Pod,
        }
    }
}

/// Object an incident is currently scoped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedObject {
    pub kind: ObjectKind,
    pub name: String,
    pub namespace: String,
}

/// Owner hint carried on a normalized event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerHint {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub helm_revision: i64,
}

/// One pre-classified cluster signal fed into the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub pod_name: String,
    pub pod_namespace: String,
    pub source: EventSourceKind,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub severity: SeverityBucket,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub owner: Option<OwnerHint>,
    #[serde(default)]
    pub chart_name: Option<String>,
    #[serde(default)]
    pub release_name: Option<String>,
}

impl NormalizedEvent {
    pub fn pod_ref(&self) -> PodRef {
        PodRef {
            name: self.pod_name.clone(),
            namespace: self.pod_namespace.clone(),
            owner: self.owner.clone(),
        }
    }

    pub fn has_pod(&self) -> bool {
        !self.pod_name.is_empty() && !self.pod_namespace.is_empty()
    }
}

/// Pod handed to the cluster-query collaborator for owner resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    pub owner: Option<OwnerHint>,
}

/// Resolved workload owner of a pod, including Helm release metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub name: String,
    pub namespace: String,
    pub chart_name: String,
    pub release_name: String,
    pub helm_revision: i64,
}

impl OwnerRef {
    pub fn involved_object(&self) -> InvolvedObject {
        InvolvedObject {
            kind: self.kind.object_kind(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// Live rollout health of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeploymentHealth {
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    /// Zero unless the deployment uses a RollingUpdate strategy
    pub max_unavailable: i32,
}

impl DeploymentHealth {
    /// Failing when fewer replicas are ready than the rollout tolerates
    pub fn is_failing(&self) -> bool {
        self.ready_replicas < self.desired_replicas - self.max_unavailable
    }
}

/// One classified occurrence attached to an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub id: String,
    pub incident_id: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub summary: String,
    pub detail: String,
    pub is_primary_cause: bool,
    pub last_seen: DateTime<Utc>,
    pub helm_revision: i64,
}

/// Identity of an incident event within one incident
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey<'a> {
    pub pod_name: &'a str,
    pub pod_namespace: &'a str,
    pub is_primary_cause: bool,
    pub summary: &'a str,
}

impl IncidentEvent {
    pub fn key(&self) -> EventKey<'_> {
        EventKey {
            pod_name: &self.pod_name,
            pod_namespace: &self.pod_namespace,
            is_primary_cause: self.is_primary_cause,
            summary: &self.summary,
        }
    }
}

/// (release name, release namespace) pair incidents are grouped under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseKey {
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One logical problem affecting a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub release_name: String,
    pub release_namespace: String,
    pub chart_name: String,
    pub involved_object: InvolvedObject,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_alerted: Option<DateTime<Utc>>,
    pub resolved_time: Option<DateTime<Utc>>,
    pub resolved_retry_count: u32,
    pub events: Vec<IncidentEvent>,
}

impl Incident {
    pub fn release_key(&self) -> ReleaseKey {
        ReleaseKey {
            name: self.release_name.clone(),
            namespace: self.release_namespace.clone(),
        }
    }

    /// Summary of the first primary-cause event, if any
    pub fn primary_cause(&self) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.is_primary_cause)
            .map(|e| e.summary.as_str())
    }

    pub fn has_primary_cause(&self, summary: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.is_primary_cause && e.summary == summary)
    }

    /// Number of distinct (pod namespace, pod name) pairs referenced
    pub fn distinct_pods(&self) -> usize {
        self.events
            .iter()
            .map(|e| (e.pod_namespace.as_str(), e.pod_name.as_str()))
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn is_active(&self) -> bool {
        self.status == IncidentStatus::Active
    }
}

/// Externally visible projection of an incident handed to alert transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentView {
    pub id: String,
    pub release_name: String,
    pub release_namespace: String,
    pub chart_name: String,
    pub kind: ObjectKind,
    pub object_name: String,
    pub object_namespace: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub primary_cause: String,
    pub details: Vec<IncidentDetail>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_time: Option<DateTime<Utc>>,
}

/// Per-pod line of an [`IncidentView`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentDetail {
    pub pod: String,
    pub summary: String,
    pub detail: String,
    pub primary: bool,
}

impl From<&Incident> for IncidentView {
    fn from(incident: &Incident) -> Self {
        Self {
            id: incident.id.clone(),
            release_name: incident.release_name.clone(),
            release_namespace: incident.release_namespace.clone(),
            chart_name: incident.chart_name.clone(),
            kind: incident.involved_object.kind,
            object_name: incident.involved_object.name.clone(),
            object_namespace: incident.involved_object.namespace.clone(),
            severity: incident.severity,
            status: incident.status,
            primary_cause: incident.primary_cause().unwrap_or_default().to_string(),
            details: incident
                .events
                .iter()
                .map(|e| IncidentDetail {
                    pod: format!("{}/{}", e.pod_namespace, e.pod_name),
                    summary: e.summary.clone(),
                    detail: e.detail.clone(),
                    primary: e.is_primary_cause,
                })
                .collect(),
            last_seen: incident.last_seen,
            resolved_time: incident.resolved_time,
        }
    }
}
