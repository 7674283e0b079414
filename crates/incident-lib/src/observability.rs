//! Observability infrastructure for the incident engine
//!
//! Provides:
//! - Prometheus metrics (batches, classifications, incident lifecycle, alerts, sweep latency)
//! - Structured JSON logging of incident lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{Incident, Severity};

/// Histogram buckets for sweep latency (in seconds)
const SWEEP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct EngineMetricsInner {
    batches_received: IntCounter,
    batches_dropped: IntCounterVec,
    events_classified: IntCounter,
    incidents_created: IntCounter,
    incidents_merged: IntCounter,
    incidents_resolved: IntCounterVec,
    alerts_sent: IntCounterVec,
    alert_failures: IntCounter,
    active_incidents: IntGauge,
    sweep_latency_seconds: Histogram,
    sweep_errors: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            batches_received: register_int_counter!(
                "incident_engine_batches_received_total",
                "Normalized event batches handed to the detector"
            )
            .expect("Failed to register batches_received"),

            batches_dropped: register_int_counter_vec!(
                "incident_engine_batches_dropped_total",
                "Batches that produced no incident mutation, by reason",
                &["reason"]
            )
            .expect("Failed to register batches_dropped"),

            events_classified: register_int_counter!(
                "incident_engine_events_classified_total",
                "Events matched by a classification rule"
            )
            .expect("Failed to register events_classified"),

            incidents_created: register_int_counter!(
                "incident_engine_incidents_created_total",
                "Incidents created"
            )
            .expect("Failed to register incidents_created"),

            incidents_merged: register_int_counter!(
                "incident_engine_incidents_merged_total",
                "Candidate incidents folded into an existing active incident"
            )
            .expect("Failed to register incidents_merged"),

            incidents_resolved: register_int_counter_vec!(
                "incident_engine_incidents_resolved_total",
                "Incidents resolved, by involved object kind",
                &["kind"]
            )
            .expect("Failed to register incidents_resolved"),

            alerts_sent: register_int_counter_vec!(
                "incident_engine_alerts_sent_total",
                "Notifications delivered, by notification type",
                &["type"]
            )
            .expect("Failed to register alerts_sent"),

            alert_failures: register_int_counter!(
                "incident_engine_alert_failures_total",
                "Notifications the transport failed to deliver"
            )
            .expect("Failed to register alert_failures"),

            active_incidents: register_int_gauge!(
                "incident_engine_active_incidents",
                "Active incidents seen by the last resolver sweep"
            )
            .expect("Failed to register active_incidents"),

            sweep_latency_seconds: register_histogram!(
                "incident_engine_sweep_latency_seconds",
                "Time spent in one resolver sweep",
                SWEEP_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sweep_latency_seconds"),

            sweep_errors: register_int_counter!(
                "incident_engine_sweep_errors_total",
                "Resolver sweeps aborted by an error or deadline"
            )
            .expect("Failed to register sweep_errors"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_batches_received(&self) {
        self.inner().batches_received.inc();
    }

    pub fn inc_batches_dropped(&self, reason: &str) {
        self.inner()
            .batches_dropped
            .with_label_values(&[reason])
            .inc();
    }

    pub fn add_events_classified(&self, count: usize) {
        self.inner().events_classified.inc_by(count as u64);
    }

    pub fn inc_incidents_created(&self) {
        self.inner().incidents_created.inc();
    }

    pub fn inc_incidents_merged(&self) {
        self.inner().incidents_merged.inc();
    }

    pub fn inc_incidents_resolved(&self, kind: &str) {
        self.inner()
            .incidents_resolved
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_alerts_sent(&self, alert_type: &str) {
        self.inner().alerts_sent.with_label_values(&[alert_type]).inc();
    }

    pub fn inc_alert_failures(&self) {
        self.inner().alert_failures.inc();
    }

    pub fn set_active_incidents(&self, count: i64) {
        self.inner().active_incidents.set(count);
    }

    pub fn observe_sweep_latency(&self, duration_secs: f64) {
        self.inner().sweep_latency_seconds.observe(duration_secs);
    }

    pub fn inc_sweep_errors(&self) {
        self.inner().sweep_errors.inc();
    }
}

/// Structured logger for incident lifecycle events
///
/// Provides consistent JSON-formatted logging for incident creation,
/// merges, resolution and alert delivery.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_incident_created(&self, incident: &Incident) {
        let cause = incident.primary_cause().unwrap_or_default();
        match incident.severity {
            Severity::Critical => warn!(
                event = "incident_created",
                node = %self.node_name,
                incident_id = %incident.id,
                release = %incident.release_name,
                namespace = %incident.release_namespace,
                kind = %incident.involved_object.kind,
                object = %incident.involved_object.name,
                severity = %incident.severity,
                cause = %cause,
                "Critical incident opened"
            ),
            Severity::Normal => info!(
                event = "incident_created",
                node = %self.node_name,
                incident_id = %incident.id,
                release = %incident.release_name,
                namespace = %incident.release_namespace,
                kind = %incident.involved_object.kind,
                object = %incident.involved_object.name,
                severity = %incident.severity,
                cause = %cause,
                "Incident opened"
            ),
        }
    }

    pub fn log_incident_merged(&self, incident: &Incident, promoted: bool) {
        info!(
            event = "incident_merged",
            node = %self.node_name,
            incident_id = %incident.id,
            release = %incident.release_name,
            namespace = %incident.release_namespace,
            kind = %incident.involved_object.kind,
            object = %incident.involved_object.name,
            events = incident.events.len(),
            pods = incident.distinct_pods(),
            promoted = promoted,
            "Merged findings into active incident"
        );
    }

    pub fn log_incident_resolved(&self, incident: &Incident) {
        info!(
            event = "incident_resolved",
            node = %self.node_name,
            incident_id = %incident.id,
            release = %incident.release_name,
            namespace = %incident.release_namespace,
            kind = %incident.involved_object.kind,
            severity = %incident.severity,
            retries = incident.resolved_retry_count,
            "Incident resolved"
        );
    }

    pub fn log_alert(&self, incident: &Incident, alert_type: &str, error: Option<&str>) {
        match error {
            None => info!(
                event = "alert_sent",
                node = %self.node_name,
                incident_id = %incident.id,
                release = %incident.release_name,
                namespace = %incident.release_namespace,
                alert_type = %alert_type,
                severity = %incident.severity,
                "Notification delivered"
            ),
            Some(error) => warn!(
                event = "alert_failed",
                node = %self.node_name,
                incident_id = %incident.id,
                release = %incident.release_name,
                namespace = %incident.release_namespace,
                alert_type = %alert_type,
                error = %error,
                "Notification failed, will retry on next trigger"
            ),
        }
    }

    pub fn log_batch_dropped(&self, pod_name: &str, namespace: &str, reason: &str, detail: &str) {
        warn!(
            event = "batch_dropped",
            node = %self.node_name,
            pod_name = %pod_name,
            namespace = %namespace,
            reason = %reason,
            detail = %detail,
            "Dropped event batch"
        );
    }

    pub fn log_startup(&self, version: &str, cluster_version: &str) {
        info!(
            event = "engine_started",
            node = %self.node_name,
            engine_version = %version,
            cluster_version = %cluster_version,
            "Incident engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Incident engine shutting down"
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("unknown")
    }
}
