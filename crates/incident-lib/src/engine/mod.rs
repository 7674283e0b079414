//! Incident lifecycle engine
//!
//! This module provides:
//! - Detection of incidents from batches of normalized events
//! - Merging of candidates into existing active incidents
//! - The periodic resolution sweep

mod detector;
mod merger;
mod resolver;


pub use detector::{DetectOutcome, Detector, SkipReason};
pub use merger::{merge_into, Merger, SaveOutcome};
pub use resolver::{Resolver, SweepReport};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{Alerter, Notifier};
use crate::cluster::ClusterQuery;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::observability::StructuredLogger;
use crate::rules::{Classifier, RuleBook};
use crate::store::{ReleaseLocks, Repository};

/// Detector and resolver wired to the same collaborators and lock map
pub struct Engine {
    detector: Arc<Detector>,
    resolver: Arc<Resolver>,
}

impl Engine {
    pub fn new(
        book: Arc<RuleBook>,
        repo: Arc<dyn Repository>,
        cluster: Arc<dyn ClusterQuery>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
        logger: StructuredLogger,
    ) -> Self {
        let locks = ReleaseLocks::new();
        let classifier = Classifier::new(book, config.cluster_version.clone());

        let merger = Merger::new(
            repo.clone(),
            locks.clone(),
            config.list_page_size,
            logger.clone(),
        );
        let detector = Detector::new(
            classifier,
            cluster.clone(),
            merger,
            config.clone(),
            logger.clone(),
        );

        let alerter = Alerter::new(
            repo.clone(),
            notifier,
            locks.clone(),
            &config,
            logger.clone(),
        );
        let resolver = Resolver::new(repo, cluster, alerter, locks, config, logger);

        Self {
            detector: Arc::new(detector),
            resolver: Arc::new(resolver),
        }
    }

    pub fn detector(&self) -> Arc<Detector> {
        self.detector.clone()
    }

    pub fn resolver(&self) -> Arc<Resolver> {
        self.resolver.clone()
    }
}

/// Await a cluster call with a deadline
async fn bounded<T, F>(limit: Duration, what: &'static str, call: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(EngineError::cluster(e)),
        Err(_) => Err(EngineError::Timeout(what)),
    }
}
