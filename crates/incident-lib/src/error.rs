//! Error types for the incident engine

use thiserror::Error;

/// Errors raised by a [`Repository`](crate::store::Repository) implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("incident {0} not found")]
    NotFound(String),

    #[error("store backend: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// A classification rule failed to compile; only raised while building rule tables
    #[error("invalid rule {reason:?} for version {version}: {source}")]
    InvalidRule {
        version: String,
        reason: String,
        #[source]
        source: regex::Error,
    },

    #[error("persistence: {0}")]
    Persistence(#[from] StoreError),

    #[error("cluster query: {0}")]
    ClusterQuery(String),

    #[error("notify: {0}")]
    Notify(String),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl EngineError {
    pub fn cluster(err: anyhow::Error) -> Self {
        Self::ClusterQuery(format!("{err:#}"))
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
