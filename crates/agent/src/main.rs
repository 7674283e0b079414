//! Incident Agent - Kubernetes incident detection and resolution
//!
//! This binary runs as a Deployment inside the cluster, accepting batches
//! of normalized events over HTTP, grouping them into incidents per Helm
//! release and periodically resolving incidents that have recovered.

use anyhow::{Context, Result};
use incident_agent::{api, config::AgentConfig};
use incident_lib::{
    alert::LogNotifier,
    cluster::KubeClusterQuery,
    engine::Engine,
    health::{components, HealthRegistry},
    observability::{EngineMetrics, StructuredLogger},
    rules::{normalize_version, RuleBook},
    store::MemoryRepository,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting incident-agent");

    let config = AgentConfig::load()?;
    info!(node_name = %config.node_name, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_engine().await;

    let metrics = EngineMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let book = Arc::new(RuleBook::builtin().context("Failed to compile classification rules")?);

    let cluster = KubeClusterQuery::try_default().await?;
    let detected_version = match cluster.server_version().await {
        Ok(version) => normalize_version(&version),
        Err(e) => {
            warn!(error = %e, "Could not detect cluster version");
            health_registry
                .record_failure(components::CLUSTER, "API server version unavailable")
                .await;
            None
        }
    };

    let engine_config = config.engine_config(detected_version);
    logger.log_startup(AGENT_VERSION, &engine_config.cluster_version);

    let repo = Arc::new(MemoryRepository::new());
    let engine = Engine::new(
        book,
        repo.clone(),
        Arc::new(cluster),
        Arc::new(LogNotifier),
        engine_config,
        logger.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let resolver_handle = tokio::spawn(engine.resolver().run(
        config.resolve_interval(),
        config.sweep_timeout(),
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        engine.detector(),
        repo,
    ));

    // Mark agent as ready once the engine is wired
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = resolver_handle.await {
        warn!(error = %e, "Resolver task ended abnormally");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    info!("Shutting down");
    Ok(())
}
