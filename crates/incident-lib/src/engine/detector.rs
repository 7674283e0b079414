//! Batch detection
//!
//! Turns one ordered batch of normalized events, all believed to share the
//! same owner, into a candidate incident and hands it to the [`Merger`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::merger::{Merger, SaveOutcome};
use super::bounded;
use crate::cluster::ClusterQuery;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{
    Incident, IncidentEvent, IncidentStatus, InvolvedObject, NormalizedEvent, ObjectKind,
    OwnerKind, OwnerRef, Severity, SeverityBucket,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::rules::{Classification, Classifier};

/// Why a batch produced no incident mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AllLowSeverity,
    MissingPod,
    OwnerUnresolved,
    Unclassified,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AllLowSeverity => "all_low_severity",
            SkipReason::MissingPod => "missing_pod",
            SkipReason::OwnerUnresolved => "owner_unresolved",
            SkipReason::Unclassified => "unclassified",
        }
    }
}

/// Outcome of handling one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectOutcome {
    Skipped(SkipReason),
    Created(String),
    Merged(String),
}

impl From<SaveOutcome> for DetectOutcome {
    fn from(outcome: SaveOutcome) -> Self {
        match outcome {
            SaveOutcome::Created(id) => DetectOutcome::Created(id),
            SaveOutcome::Merged { id, .. } => DetectOutcome::Merged(id),
        }
    }
}

pub struct Detector {
    classifier: Classifier,
    cluster: Arc<dyn ClusterQuery>,
    merger: Merger,
    config: EngineConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Detector {
    pub fn new(
        classifier: Classifier,
        cluster: Arc<dyn ClusterQuery>,
        merger: Merger,
        config: EngineConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            classifier,
            cluster,
            merger,
            config,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    pub async fn handle_batch(&self, events: &[NormalizedEvent]) -> Result<DetectOutcome> {
        self.handle_batch_at(events, Utc::now()).await
    }

    pub async fn handle_batch_at(
        &self,
        events: &[NormalizedEvent],
        now: DateTime<Utc>,
    ) -> Result<DetectOutcome> {
        self.metrics.inc_batches_received();

        let significant: Vec<&NormalizedEvent> = events
            .iter()
            .filter(|e| e.severity != SeverityBucket::Low)
            .collect();
        if significant.is_empty() {
            return Ok(self.skip(SkipReason::AllLowSeverity, events.first(), ""));
        }

        let with_pod: Vec<&NormalizedEvent> =
            significant.into_iter().filter(|e| e.has_pod()).collect();
        let Some(first) = with_pod.first().copied() else {
            return Ok(self.skip(SkipReason::MissingPod, events.first(), ""));
        };

        let owner = match bounded(
            self.config.cluster_query_timeout,
            "owner resolution",
            self.cluster.resolve_owner(&first.pod_ref()),
        )
        .await
        {
            Ok(owner) => owner,
            Err(e) => {
                return Ok(self.skip(SkipReason::OwnerUnresolved, Some(first), &e.to_string()));
            }
        };

        let classified: Vec<(&NormalizedEvent, Classification)> = with_pod
            .into_iter()
            .filter_map(|e| self.classifier.classify(e).map(|c| (e, c)))
            .collect();
        if classified.is_empty() {
            return Ok(self.skip(SkipReason::Unclassified, Some(first), ""));
        }
        self.metrics.add_events_classified(classified.len());

        let involved_object = self.scope(&owner, first).await;
        let candidate = build_candidate(&classified, &owner, involved_object, now);

        debug!(
            incident_id = %candidate.id,
            release = %candidate.release_name,
            namespace = %candidate.release_namespace,
            kind = %candidate.involved_object.kind,
            events = candidate.events.len(),
            "Built candidate incident"
        );

        let outcome = self.merger.save_at(candidate, &owner, now).await?;
        Ok(outcome.into())
    }

    /// Pick the object the incident is scoped to
    async fn scope(&self, owner: &OwnerRef, origin: &NormalizedEvent) -> InvolvedObject {
        let pod = InvolvedObject {
            kind: ObjectKind::Pod,
            name: origin.pod_name.clone(),
            namespace: origin.pod_namespace.clone(),
        };

        match owner.kind {
            OwnerKind::Deployment => {
                let health = bounded(
                    self.config.cluster_query_timeout,
                    "deployment health",
                    self.cluster.deployment_health(&owner.namespace, &owner.name),
                )
                .await;

                match health {
                    Ok(health) if health.is_failing() => owner.involved_object(),
                    Ok(_) => pod,
                    Err(e) => {
                        warn!(
                            deployment = %owner.name,
                            namespace = %owner.namespace,
                            error = %e,
                            "Deployment health unavailable, scoping incident to pod"
                        );
                        pod
                    }
                }
            }
            OwnerKind::Job => owner.involved_object(),
            _ => pod,
        }
    }

    fn skip(
        &self,
        reason: SkipReason,
        event: Option<&NormalizedEvent>,
        detail: &str,
    ) -> DetectOutcome {
        let (pod, namespace) = event
            .map(|e| (e.pod_name.as_str(), e.pod_namespace.as_str()))
            .unwrap_or_default();
        self.metrics.inc_batches_dropped(reason.as_str());
        self.logger
            .log_batch_dropped(pod, namespace, reason.as_str(), detail);
        DetectOutcome::Skipped(reason)
    }
}

fn build_candidate(
    classified: &[(&NormalizedEvent, Classification)],
    owner: &OwnerRef,
    involved_object: InvolvedObject,
    now: DateTime<Utc>,
) -> Incident {
    let id = Uuid::new_v4().to_string();

    let severity = if classified
        .iter()
        .any(|(e, _)| e.severity == SeverityBucket::Critical)
    {
        Severity::Critical
    } else {
        Severity::Normal
    };

    let origin = classified[0].0;
    let release_name = if !owner.release_name.is_empty() {
        owner.release_name.clone()
    } else {
        origin
            .release_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| owner.name.clone())
    };
    let chart_name = if !owner.chart_name.is_empty() {
        owner.chart_name.clone()
    } else {
        origin.chart_name.clone().unwrap_or_default()
    };

    let mut events: Vec<IncidentEvent> = Vec::with_capacity(classified.len());
    for (event, classification) in classified {
        let incident_event = IncidentEvent {
            id: Uuid::new_v4().to_string(),
            incident_id: id.clone(),
            pod_name: event.pod_name.clone(),
            pod_namespace: event.pod_namespace.clone(),
            summary: classification.summary.clone(),
            detail: classification.detail.clone(),
            is_primary_cause: classification.primary,
            last_seen: event.timestamp,
            helm_revision: owner.helm_revision,
        };

        match events.iter_mut().find(|e| e.key() == incident_event.key()) {
            Some(existing) => {
                existing.last_seen = incident_event.last_seen;
                existing.detail = incident_event.detail;
            }
            None => events.push(incident_event),
        }
    }

    Incident {
        id,
        release_name,
        release_namespace: owner.namespace.clone(),
        chart_name,
        involved_object,
        severity,
        status: IncidentStatus::Active,
        created_at: now,
        last_seen: now,
        last_alerted: None,
        resolved_time: None,
        resolved_retry_count: 0,
        events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventSourceKind;

    fn owner() -> OwnerRef {
        OwnerRef {
            kind: OwnerKind::Deployment,
            name: "web".to_string(),
            namespace: "default".to_string(),
            chart_name: String::new(),
            release_name: String::new(),
            helm_revision: 7,
        }
    }

    fn event(pod: &str, bucket: SeverityBucket) -> NormalizedEvent {
        NormalizedEvent {
            pod_name: pod.to_string(),
            pod_namespace: "default".to_string(),
            source: EventSourceKind::Pod,
            reason: "OOMKilled".to_string(),
            message: String::new(),
            exit_code: Some(137),
            severity: bucket,
            timestamp: Utc::now(),
            owner: None,
            chart_name: Some("web-2.1.0".to_string()),
            release_name: Some("web-release".to_string()),
        }
    }

    fn classification(summary: &str, primary: bool) -> Classification {
        Classification {
            summary: summary.to_string(),
            detail: "detail".to_string(),
            primary,
        }
    }

    #[test]
    fn test_candidate_falls_back_to_event_release() {
        let e = event("web-0", SeverityBucket::High);
        let classified = vec![(&e, classification("oom", true))];
        let pod = InvolvedObject {
            kind: ObjectKind::Pod,
            name: "web-0".to_string(),
            namespace: "default".to_string(),
        };

        let candidate = build_candidate(&classified, &owner(), pod, Utc::now());

        assert_eq!(candidate.release_name, "web-release");
        assert_eq!(candidate.chart_name, "web-2.1.0");
        assert_eq!(candidate.release_namespace, "default");
        assert_eq!(candidate.severity, Severity::Normal);
        assert_eq!(candidate.events[0].helm_revision, 7);
        assert_eq!(candidate.events[0].incident_id, candidate.id);
    }

    #[test]
    fn test_candidate_dedupes_and_escalates_severity() {
        let a = event("web-0", SeverityBucket::High);
        let b = event("web-0", SeverityBucket::Critical);
        let classified = vec![
            (&a, classification("oom", true)),
            (&b, classification("oom", true)),
        ];
        let scope = owner().involved_object();

        let candidate = build_candidate(&classified, &owner(), scope, Utc::now());

        assert_eq!(candidate.events.len(), 1);
        assert_eq!(candidate.severity, Severity::Critical);
        assert_eq!(candidate.events[0].last_seen, b.timestamp);
    }

    #[test]
    fn test_skip_reason_labels() {
        assert_eq!(SkipReason::AllLowSeverity.as_str(), "all_low_severity");
        assert_eq!(SkipReason::OwnerUnresolved.as_str(), "owner_unresolved");
    }
}
