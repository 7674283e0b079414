//! HTTP API for event ingestion, incident listing, health checks and
//! Prometheus metrics

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use incident_lib::{
    engine::{DetectOutcome, Detector},
    error::EngineError,
    health::{components, ComponentStatus, HealthRegistry},
    models::{IncidentStatus, IncidentView, NormalizedEvent},
    observability::EngineMetrics,
    store::{IncidentFilter, Page, Pagination, Repository, DEFAULT_PAGE_SIZE},
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Largest page the incident listing will return
const MAX_PAGE_SIZE: usize = 500;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: EngineMetrics,
    pub detector: Arc<Detector>,
    pub repo: Arc<dyn Repository>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: EngineMetrics,
        detector: Arc<Detector>,
        repo: Arc<dyn Repository>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            detector,
            repo,
        }
    }
}

/// Body returned for an ingested batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<DetectOutcome> for DetectResponse {
    fn from(outcome: DetectOutcome) -> Self {
        match outcome {
            DetectOutcome::Created(id) => Self {
                outcome: "created".to_string(),
                incident_id: Some(id),
                reason: None,
            },
            DetectOutcome::Merged(id) => Self {
                outcome: "merged".to_string(),
                incident_id: Some(id),
                reason: None,
            },
            DetectOutcome::Skipped(reason) => Self {
                outcome: "skipped".to_string(),
                incident_id: None,
                reason: Some(reason.as_str().to_string()),
            },
        }
    }
}

/// Query string of `GET /v1/incidents`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentQuery {
    pub status: Option<IncidentStatus>,
    pub release: Option<String>,
    pub namespace: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl IncidentQuery {
    fn filter(&self) -> IncidentFilter {
        IncidentFilter {
            status: self.status,
            release_name: self.release.clone(),
            release_namespace: self.namespace.clone(),
        }
    }

    fn pagination(&self) -> Pagination {
        Pagination::new(
            self.page.unwrap_or(1),
            self.page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .min(MAX_PAGE_SIZE),
        )
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Liveness - 200 while every component is at least degraded, 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Ingest one batch of normalized events sharing an owner
async fn ingest_events(
    State(state): State<Arc<AppState>>,
    Json(events): Json<Vec<NormalizedEvent>>,
) -> Response {
    match state.detector.handle_batch(&events).await {
        Ok(outcome) => {
            if !matches!(outcome, DetectOutcome::Skipped(_)) {
                state
                    .health_registry
                    .record_success(components::REPOSITORY)
                    .await;
            }
            state
                .health_registry
                .record_success(components::DETECTOR)
                .await;
            (StatusCode::OK, Json(DetectResponse::from(outcome))).into_response()
        }
        Err(e) => {
            error!(error = %e, events = events.len(), "Failed to handle event batch");
            let status = match &e {
                EngineError::Persistence(_) => {
                    state
                        .health_registry
                        .record_failure(components::REPOSITORY, e.to_string())
                        .await;
                    StatusCode::SERVICE_UNAVAILABLE
                }
                EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            state
                .health_registry
                .record_failure(components::DETECTOR, e.to_string())
                .await;
            error_response(status, e.to_string())
        }
    }
}

/// List incidents in creation order, filtered by status and release
async fn list_incidents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IncidentQuery>,
) -> Response {
    match state
        .repo
        .list_incidents(&query.filter(), query.pagination())
        .await
    {
        Ok(page) => {
            state
                .health_registry
                .record_success(components::REPOSITORY)
                .await;
            let views = Page {
                items: page.items.iter().map(IncidentView::from).collect(),
                total: page.total,
                page: page.page,
                page_size: page.page_size,
                has_more: page.has_more,
            };
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to list incidents");
            state
                .health_registry
                .record_failure(components::REPOSITORY, e.to_string())
                .await;
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/events", post(ingest_events))
        .route("/v1/incidents", get(list_incidents))
        .with_state(state)
}

/// Start the API server and stop accepting requests once `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
