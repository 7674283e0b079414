//! Periodic resolution sweep
//!
//! Every active incident is re-evaluated on each sweep:
//! - Critical Deployment incidents wait out the buffer window, then need
//!   `resolved_retry_threshold` consecutive healthy probes
//!   (or, when the deployment can no longer be read, once quiet for
//!   `settle_after`)
//! - Everything else resolves once it has been quiet for `settle_after`
//!
//! Incidents that stay open are handed to the alerter, which re-notifies on
//! its own cadence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use super::bounded;
use crate::alert::Alerter;
use crate::cluster::ClusterQuery;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreError};
use crate::health::{components, HealthRegistry};
use crate::models::{Incident, IncidentStatus, ObjectKind, Severity};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::store::{list_all, IncidentFilter, ReleaseLocks, Repository};

/// Counters for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub resolved: usize,
    pub alerts_sent: usize,
    pub alert_failures: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Resolved,
    Unresolved,
    /// Not evaluated this sweep
    Skip,
}

pub struct Resolver {
    repo: Arc<dyn Repository>,
    cluster: Arc<dyn ClusterQuery>,
    alerter: Alerter,
    locks: ReleaseLocks,
    config: EngineConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Resolver {
    pub fn new(
        repo: Arc<dyn Repository>,
        cluster: Arc<dyn ClusterQuery>,
        alerter: Alerter,
        locks: ReleaseLocks,
        config: EngineConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            repo,
            cluster,
            alerter,
            locks,
            config,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let start = Instant::now();
        let active = list_all(
            self.repo.as_ref(),
            &IncidentFilter::active(),
            self.config.list_page_size,
        )
        .await?;

        let mut report = SweepReport {
            examined: active.len(),
            ..Default::default()
        };

        for listed in active {
            let (mut incident, verdict) = {
                let _guard = self.locks.lock(&listed.release_key()).await;

                // Re-read under the lock; a concurrent merge may have changed it.
                let mut incident = match self.repo.read_incident(&listed.id).await {
                    Ok(incident) if incident.is_active() => incident,
                    Ok(_) | Err(StoreError::NotFound(_)) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                let verdict = self.evaluate(&mut incident, now).await?;
                if verdict == Verdict::Resolved {
                    self.resolve(&mut incident, now).await?;
                }
                (incident, verdict)
            };

            // Delivery runs without the release lock held; the alerter
            // re-takes it only to persist the marker.
            match verdict {
                Verdict::Skip => report.skipped += 1,
                Verdict::Unresolved => {
                    let delivery = self.alerter.handle_incident(&mut incident, now).await;
                    record_delivery(&mut report, delivery)?;
                }
                Verdict::Resolved => {
                    report.resolved += 1;
                    let delivery = self.alerter.handle_resolved(&mut incident, now).await;
                    record_delivery(&mut report, delivery)?;
                }
            }
        }

        self.locks.prune();

        self.metrics
            .set_active_incidents((report.examined - report.resolved) as i64);
        self.metrics
            .observe_sweep_latency(start.elapsed().as_secs_f64());

        Ok(report)
    }

    async fn evaluate(&self, incident: &mut Incident, now: DateTime<Utc>) -> Result<Verdict> {
        let settled = now >= incident.last_seen + self.config.settle_after;

        if incident.involved_object.kind != ObjectKind::Deployment
            || incident.severity != Severity::Critical
        {
            return Ok(if settled {
                Verdict::Resolved
            } else {
                Verdict::Unresolved
            });
        }

        if now < incident.last_seen + self.config.buffer_window {
            return Ok(Verdict::Unresolved);
        }

        let object = &incident.involved_object;
        let health = match bounded(
            self.config.cluster_query_timeout,
            "deployment health",
            self.cluster.deployment_health(&object.namespace, &object.name),
        )
        .await
        {
            Ok(health) => health,
            Err(e) if settled => {
                // A deployment that stays unreadable (deleted, renamed,
                // forbidden) falls back to the quiet-period rule.
                warn!(
                    incident_id = %incident.id,
                    deployment = %object.name,
                    namespace = %object.namespace,
                    error = %e,
                    "Deployment health unavailable past the settle period, resolving"
                );
                return Ok(Verdict::Resolved);
            }
            Err(e) => {
                warn!(
                    incident_id = %incident.id,
                    deployment = %object.name,
                    namespace = %object.namespace,
                    error = %e,
                    "Deployment health unavailable, skipping incident this sweep"
                );
                return Ok(Verdict::Skip);
            }
        };

        if health.is_failing() {
            incident.resolved_retry_count = 0;
            self.repo.update_incident(incident).await?;
            return Ok(Verdict::Unresolved);
        }

        incident.resolved_retry_count += 1;
        self.repo.update_incident(incident).await?;

        debug!(
            incident_id = %incident.id,
            retry_count = incident.resolved_retry_count,
            threshold = self.config.resolved_retry_threshold,
            "Deployment healthy"
        );

        Ok(
            if incident.resolved_retry_count >= self.config.resolved_retry_threshold {
                Verdict::Resolved
            } else {
                Verdict::Unresolved
            },
        )
    }

    async fn resolve(&self, incident: &mut Incident, now: DateTime<Utc>) -> Result<()> {
        incident.status = IncidentStatus::Resolved;
        incident.resolved_time = Some(now);
        self.repo.update_incident(incident).await?;

        self.metrics
            .inc_incidents_resolved(&incident.involved_object.kind.to_string());
        self.logger.log_incident_resolved(incident);
        Ok(())
    }

    /// Run sweeps every `every` until `shutdown` fires
    pub async fn run(
        self: Arc<Self>,
        every: Duration,
        sweep_timeout: Duration,
        health: HealthRegistry,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_secs = every.as_secs(),
            timeout_secs = sweep_timeout.as_secs(),
            "Starting resolver loop"
        );

        let mut ticker = interval(every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tokio::time::timeout(sweep_timeout, self.sweep()).await {
                        Ok(Ok(report)) => {
                            debug!(
                                examined = report.examined,
                                resolved = report.resolved,
                                alerts = report.alerts_sent,
                                alert_failures = report.alert_failures,
                                skipped = report.skipped,
                                "Sweep complete"
                            );
                            health.record_success(components::RESOLVER).await;
                            health.record_success(components::REPOSITORY).await;
                        }
                        Ok(Err(e)) => {
                            self.metrics.inc_sweep_errors();
                            warn!(error = %e, "Sweep aborted");
                            if matches!(e, EngineError::Persistence(_)) {
                                health.record_failure(components::REPOSITORY, e.to_string()).await;
                            }
                            health.record_failure(components::RESOLVER, e.to_string()).await;
                        }
                        Err(_) => {
                            self.metrics.inc_sweep_errors();
                            warn!(timeout_secs = sweep_timeout.as_secs(), "Sweep deadline exceeded");
                            health.record_failure(components::RESOLVER, "sweep deadline exceeded").await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down resolver loop");
                    break;
                }
            }
        }
    }
}

/// Fold an alert delivery result into the report. Only delivery failures
/// are absorbed; anything else aborts the sweep.
fn record_delivery(report: &mut SweepReport, delivery: Result<bool>) -> Result<()> {
    match delivery {
        Ok(true) => report.alerts_sent += 1,
        Ok(false) => {}
        Err(EngineError::Notify(_)) => report.alert_failures += 1,
        Err(e) => return Err(e),
    }
    Ok(())
}
