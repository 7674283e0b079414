//! Incident engine for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Classifying normalized cluster events with per-version rule tables
//! - Detecting incidents and merging them per Helm release
//! - Resolving incidents and alerting on a severity-aware cadence
//! - Cluster queries, persistence and health checks

pub mod alert;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod rules;
pub mod store;

pub use alert::{Alerter, LogNotifier, Notifier};
pub use cluster::{ClusterQuery, KubeClusterQuery};
pub use config::EngineConfig;
pub use engine::{DetectOutcome, Detector, Engine, Resolver, SkipReason, SweepReport};
pub use error::{EngineError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use rules::{Classifier, RuleBook};
pub use store::{IncidentFilter, MemoryRepository, Page, Pagination, Repository};
