//! Incident merge and deduplication
//!
//! A candidate incident is folded into the first active incident of the
//! same release whose primary cause matches; otherwise it is persisted as a
//! new incident. The whole read-modify-write runs under the release lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::models::{Incident, OwnerRef};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::store::{list_all, IncidentFilter, ReleaseLocks, Repository};

/// Result of saving a candidate incident
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Created(String),
    Merged { id: String, promoted: bool },
}

impl SaveOutcome {
    pub fn incident_id(&self) -> &str {
        match self {
            SaveOutcome::Created(id) => id,
            SaveOutcome::Merged { id, .. } => id,
        }
    }
}

pub struct Merger {
    repo: Arc<dyn Repository>,
    locks: ReleaseLocks,
    page_size: usize,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Merger {
    pub fn new(
        repo: Arc<dyn Repository>,
        locks: ReleaseLocks,
        page_size: usize,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            repo,
            locks,
            page_size,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    pub async fn save(&self, candidate: Incident, owner: &OwnerRef) -> Result<SaveOutcome> {
        self.save_at(candidate, owner, Utc::now()).await
    }

    /// Create `candidate` or merge it into the matching active incident
    pub async fn save_at(
        &self,
        candidate: Incident,
        owner: &OwnerRef,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        let _guard = self.locks.lock(&candidate.release_key()).await;

        let cause = candidate.primary_cause().unwrap_or_default().to_string();
        let filter =
            IncidentFilter::active_for(&candidate.release_name, &candidate.release_namespace);
        let active = list_all(self.repo.as_ref(), &filter, self.page_size).await?;

        let Some(mut target) = active.into_iter().find(|i| i.has_primary_cause(&cause)) else {
            self.repo.create_incident(&candidate).await?;
            self.metrics.inc_incidents_created();
            self.logger.log_incident_created(&candidate);
            return Ok(SaveOutcome::Created(candidate.id));
        };

        debug!(
            incident_id = %target.id,
            release = %target.release_name,
            cause = %cause,
            "Found merge target"
        );

        let promoted = merge_into(&mut target, candidate, owner, now);
        self.repo.update_incident(&target).await?;
        self.metrics.inc_incidents_merged();
        self.logger.log_incident_merged(&target, promoted);

        Ok(SaveOutcome::Merged {
            id: target.id,
            promoted,
        })
    }
}

/// Fold `candidate`'s events into `target`
///
/// Events sharing (pod name, pod namespace, primary flag, summary) refresh
/// last-seen and detail in place; the rest are appended after the target's
/// existing events in candidate order. Once more than one pod is involved
/// the target is re-scoped to `owner`. Returns whether the scope changed.
pub fn merge_into(
    target: &mut Incident,
    candidate: Incident,
    owner: &OwnerRef,
    now: DateTime<Utc>,
) -> bool {
    target.last_seen = now;

    for mut incoming in candidate.events {
        match target.events.iter_mut().find(|e| e.key() == incoming.key()) {
            Some(existing) => {
                existing.last_seen = incoming.last_seen;
                existing.detail = incoming.detail;
            }
            None => {
                incoming.incident_id = target.id.clone();
                target.events.push(incoming);
            }
        }
    }

    if target.distinct_pods() <= 1 {
        return false;
    }

    let promoted = owner.involved_object();
    let changed = target.involved_object != promoted;
    target.involved_object = promoted;
    changed
}
