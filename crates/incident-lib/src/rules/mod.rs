//! Rule-based classification of normalized cluster events
//!
//! This module provides:
//! - Per-version ordered rule tables ([`RuleTable`], [`RuleBook`])
//! - The built-in cause catalogue for supported cluster versions
//! - A [`Classifier`] bound to one cluster version

mod builtin;
mod table;

pub use builtin::{rule_specs, SUPPORTED_VERSIONS};
pub use table::{
    normalize_version, Classification, DetailFn, EventMatch, RuleBook, RuleSpec, RuleTable,
};

/// Cause labels produced by the built-in rules
pub mod causes {
    pub use super::builtin::{
        CONFIG_INVALID, CONFIG_MAP_MISSING, CRASH_LOOPING, EVICTED, EXITED_WITH_ERROR,
        IMAGE_MISSING, IMAGE_PULL_FAILED, IMAGE_RATE_LIMITED, IMAGE_UNAUTHORIZED,
        INSUFFICIENT_RESOURCES, LIVENESS_FAILING, LIVENESS_RESTART, OUT_OF_MEMORY,
        READINESS_FAILING, SANDBOX_FAILED, SECRET_MISSING, STARTUP_FAILING, UNSCHEDULABLE,
        VOLUME_MOUNT_FAILED,
    };
}

use std::sync::Arc;

use crate::models::NormalizedEvent;

/// Classifies events against the rule table of a fixed cluster version
#[derive(Debug, Clone)]
pub struct Classifier {
    book: Arc<RuleBook>,
    version: String,
}

impl Classifier {
    pub fn new(book: Arc<RuleBook>, version: impl Into<String>) -> Self {
        let version = version.into();
        if book.table(&version).is_none() {
            tracing::warn!(
                version = %version,
                supported = ?book.versions(),
                "No rule table for cluster version, no events will be classified"
            );
        }
        Self { book, version }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classify(&self, event: &NormalizedEvent) -> Option<Classification> {
        self.book.classify(&self.version, event)
    }
}
