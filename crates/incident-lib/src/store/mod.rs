//! Incident persistence
//!
//! This module provides:
//! - The [`Repository`] trait the engine persists incidents through
//! - An in-memory repository for single-process deployments and tests
//! - Per-release locks serializing read-modify-write cycles

mod locks;
mod memory;

pub use locks::ReleaseLocks;
pub use memory::MemoryRepository;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Incident, IncidentStatus};

/// Default page size when paging through incidents
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Filter for listing incidents. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub release_name: Option<String>,
    pub release_namespace: Option<String>,
}

impl IncidentFilter {
    pub fn active() -> Self {
        Self {
            status: Some(IncidentStatus::Active),
            ..Default::default()
        }
    }

    pub fn active_for(release_name: &str, release_namespace: &str) -> Self {
        Self {
            status: Some(IncidentStatus::Active),
            release_name: Some(release_name.to_string()),
            release_namespace: Some(release_namespace.to_string()),
        }
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        self.status.map_or(true, |s| s == incident.status)
            && self
                .release_name
                .as_deref()
                .map_or(true, |n| n == incident.release_name)
            && self
                .release_namespace
                .as_deref()
                .map_or(true, |ns| ns == incident.release_namespace)
    }
}

/// One-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
}

impl Pagination {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn first(page_size: usize) -> Self {
        Self::new(1, page_size)
    }

    pub fn next(self) -> Self {
        Self {
            page: self.page + 1,
            ..self
        }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus paging info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// Persistence collaborator for incidents
///
/// Listing order must be stable (creation order) so that merge-target
/// selection is reproducible.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    /// Returns [`StoreError::NotFound`] on a miss
    async fn read_incident(&self, id: &str) -> Result<Incident, StoreError>;

    async fn list_incidents(
        &self,
        filter: &IncidentFilter,
        pagination: Pagination,
    ) -> Result<Page<Incident>, StoreError>;
}

/// Page through every incident matching `filter`
pub async fn list_all(
    repo: &dyn Repository,
    filter: &IncidentFilter,
    page_size: usize,
) -> Result<Vec<Incident>, StoreError> {
    let mut pagination = Pagination::first(page_size);
    let mut incidents = Vec::new();

    loop {
        let page = repo.list_incidents(filter, pagination).await?;
        let has_more = page.has_more && !page.items.is_empty();
        incidents.extend(page.items);
        if !has_more {
            break;
        }
        pagination = pagination.next();
    }

    Ok(incidents)
}
