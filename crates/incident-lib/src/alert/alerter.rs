//! Alert cadence gate
//!
//! Decides whether an incident warrants a notification right now:
//! - Critical incidents re-alert once the hour-floored time since the last
//!   alert reaches the critical interval (1h by default)
//! - Normal incidents use the same rule with a 24h interval
//! - Only critical incidents get a resolution notification
//!
//! The last-alerted marker is written only after the transport succeeds, so a
//! failed delivery is retried on the next trigger. Delivery runs without the
//! release lock; the marker is written under it onto a fresh read, so events
//! merged while the transport was busy are kept.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::Notifier;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreError};
use crate::models::{Incident, IncidentView, Severity};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::store::{ReleaseLocks, Repository};

const ALERT_NEW: &str = "new";
const ALERT_RESOLVED: &str = "resolved";

/// Alert emitter with severity-aware cadence
pub struct Alerter {
    repo: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    locks: ReleaseLocks,
    critical_realert_hours: i64,
    normal_realert_hours: i64,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Alerter {
    pub fn new(
        repo: Arc<dyn Repository>,
        notifier: Arc<dyn Notifier>,
        locks: ReleaseLocks,
        config: &EngineConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            repo,
            notifier,
            locks,
            critical_realert_hours: config.critical_realert_hours,
            normal_realert_hours: config.normal_realert_hours,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    /// Whether an active incident is due for a notification at `now`
    pub fn should_alert(&self, incident: &Incident, now: DateTime<Utc>) -> bool {
        let Some(last_alerted) = incident.last_alerted else {
            return true;
        };

        // Elapsed time is floored to whole hours before the comparison.
        let elapsed_hours = (now - last_alerted).num_hours();
        let threshold = match incident.severity {
            Severity::Critical => self.critical_realert_hours,
            Severity::Normal => self.normal_realert_hours,
        };
        elapsed_hours >= threshold
    }

    /// Notify about an active incident if its cadence allows
    ///
    /// Returns `Ok(true)` when a notification was delivered.
    pub async fn handle_incident(&self, incident: &mut Incident, now: DateTime<Utc>) -> Result<bool> {
        if !self.should_alert(incident, now) {
            return Ok(false);
        }

        let view = IncidentView::from(&*incident);
        if let Err(e) = self.notifier.notify_new(&view).await {
            return Err(self.delivery_failed(incident, ALERT_NEW, e));
        }

        self.mark_alerted(incident, ALERT_NEW, now).await?;
        Ok(true)
    }

    /// Notify about a resolved incident. Normal incidents are never announced.
    pub async fn handle_resolved(&self, incident: &mut Incident, now: DateTime<Utc>) -> Result<bool> {
        if incident.severity != Severity::Critical {
            return Ok(false);
        }

        let view = IncidentView::from(&*incident);
        if let Err(e) = self.notifier.notify_resolved(&view).await {
            return Err(self.delivery_failed(incident, ALERT_RESOLVED, e));
        }

        self.mark_alerted(incident, ALERT_RESOLVED, now).await?;
        Ok(true)
    }

    async fn mark_alerted(&self, incident: &mut Incident, alert_type: &str, now: DateTime<Utc>) -> Result<()> {
        incident.last_alerted = Some(now);
        {
            let _guard = self.locks.lock(&incident.release_key()).await;
            match self.repo.read_incident(&incident.id).await {
                Ok(mut stored) => {
                    stored.last_alerted = Some(now);
                    self.repo.update_incident(&stored).await?;
                    *incident = stored;
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.metrics.inc_alerts_sent(alert_type);
        self.logger.log_alert(incident, alert_type, None);
        Ok(())
    }

    fn delivery_failed(&self, incident: &Incident, alert_type: &str, err: anyhow::Error) -> EngineError {
        let message = format!("{err:#}");
        self.metrics.inc_alert_failures();
        self.logger.log_alert(incident, alert_type, Some(&message));
        EngineError::Notify(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentStatus, InvolvedObject, ObjectKind};
    use crate::store::MemoryRepository;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        new: AtomicUsize,
        resolved: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify_new(&self, _incident: &IncidentView) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("webhook returned 502");
            }
            self.new.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_resolved(&self, _incident: &IncidentView) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("webhook returned 502");
            }
            self.resolved.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn incident(severity: Severity, now: DateTime<Utc>) -> Incident {
        Incident {
            id: "inc-1".to_string(),
            release_name: "web".to_string(),
            release_namespace: "default".to_string(),
            chart_name: "web-1.0.0".to_string(),
            involved_object: InvolvedObject {
                kind: ObjectKind::Pod,
                name: "web-0".to_string(),
                namespace: "default".to_string(),
            },
            severity,
            status: IncidentStatus::Active,
            created_at: now,
            last_seen: now,
            last_alerted: None,
            resolved_time: None,
            resolved_retry_count: 0,
            events: Vec::new(),
        }
    }

    async fn setup(
        severity: Severity,
        now: DateTime<Utc>,
    ) -> (Alerter, Arc<CountingNotifier>, Arc<MemoryRepository>, Incident) {
        let repo = Arc::new(MemoryRepository::new());
        let notifier = Arc::new(CountingNotifier::default());
        let inc = incident(severity, now);
        repo.create_incident(&inc).await.unwrap();

        let alerter = Alerter::new(
            repo.clone(),
            notifier.clone(),
            ReleaseLocks::new(),
            &EngineConfig::default(),
            StructuredLogger::new("test-node"),
        );
        (alerter, notifier, repo, inc)
    }

    #[tokio::test]
    async fn test_critical_first_alert_then_hourly() {
        let now = Utc::now();
        let (alerter, notifier, repo, mut inc) = setup(Severity::Critical, now).await;

        assert!(alerter.handle_incident(&mut inc, now).await.unwrap());
        assert_eq!(repo.read_incident("inc-1").await.unwrap().last_alerted, Some(now));

        let later = now + Duration::minutes(59);
        assert!(!alerter.handle_incident(&mut inc, later).await.unwrap());

        let hour = now + Duration::minutes(60);
        assert!(alerter.handle_incident(&mut inc, hour).await.unwrap());
        assert_eq!(notifier.new.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_normal_realert_after_a_day() {
        let now = Utc::now();
        let (alerter, notifier, _repo, mut inc) = setup(Severity::Normal, now).await;

        assert!(alerter.handle_incident(&mut inc, now).await.unwrap());
        assert!(!alerter
            .handle_incident(&mut inc, now + Duration::hours(23) + Duration::minutes(59))
            .await
            .unwrap());
        assert!(alerter
            .handle_incident(&mut inc, now + Duration::hours(24))
            .await
            .unwrap());
        assert_eq!(notifier.new.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_marker() {
        let now = Utc::now();
        let (alerter, notifier, repo, mut inc) = setup(Severity::Critical, now).await;
        notifier.fail.store(true, Ordering::SeqCst);

        let err = alerter.handle_incident(&mut inc, now).await.unwrap_err();
        assert!(matches!(err, EngineError::Notify(_)));
        assert!(inc.last_alerted.is_none());
        assert!(repo.read_incident("inc-1").await.unwrap().last_alerted.is_none());

        // Next trigger retries immediately
        notifier.fail.store(false, Ordering::SeqCst);
        let retry_at = now + Duration::seconds(30);
        assert!(alerter.handle_incident(&mut inc, retry_at).await.unwrap());
        assert_eq!(inc.last_alerted, Some(retry_at));
    }

    #[tokio::test]
    async fn test_resolution_only_announced_for_critical() {
        let now = Utc::now();
        let (alerter, notifier, _repo, mut critical) = setup(Severity::Critical, now).await;
        critical.last_alerted = Some(now);
        assert!(alerter.handle_resolved(&mut critical, now).await.unwrap());
        assert_eq!(notifier.resolved.load(Ordering::SeqCst), 1);

        let (alerter, notifier, _repo, mut normal) = setup(Severity::Normal, now).await;
        assert!(!alerter.handle_resolved(&mut normal, now).await.unwrap());
        assert_eq!(notifier.resolved.load(Ordering::SeqCst), 0);
        assert!(normal.last_alerted.is_none());
    }
}
