//! Notification transport seam

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{IncidentView, Severity};

/// Delivers incident notifications to an external system
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_new(&self, incident: &IncidentView) -> Result<()>;

    async fn notify_resolved(&self, incident: &IncidentView) -> Result<()>;
}

/// Notifier that writes notifications to the structured log
///
/// Used when no outbound transport is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_new(&self, incident: &IncidentView) -> Result<()> {
        let pods = incident.details.len();
        match incident.severity {
            Severity::Critical => warn!(
                notification = "incident",
                incident_id = %incident.id,
                release = %incident.release_name,
                namespace = %incident.release_namespace,
                kind = %incident.kind,
                object = %incident.object_name,
                cause = %incident.primary_cause,
                events = pods,
                "Critical incident in release {}", incident.release_name
            ),
            Severity::Normal => info!(
                notification = "incident",
                incident_id = %incident.id,
                release = %incident.release_name,
                namespace = %incident.release_namespace,
                kind = %incident.kind,
                object = %incident.object_name,
                cause = %incident.primary_cause,
                events = pods,
                "Incident in release {}", incident.release_name
            ),
        }
        Ok(())
    }

    async fn notify_resolved(&self, incident: &IncidentView) -> Result<()> {
        info!(
            notification = "resolved",
            incident_id = %incident.id,
            release = %incident.release_name,
            namespace = %incident.release_namespace,
            cause = %incident.primary_cause,
            resolved_time = ?incident.resolved_time,
            "Incident in release {} resolved", incident.release_name
        );
        Ok(())
    }
}
