//! In-memory incident repository

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{IncidentFilter, Page, Pagination, Repository};
use crate::error::StoreError;
use crate::models::Incident;

/// Stored incident with its insertion sequence for stable ordering
#[derive(Debug, Clone)]
struct StoredIncident {
    seq: u64,
    incident: Incident,
}

/// Thread-safe repository keeping incidents in process memory
///
/// Listing returns incidents in creation order.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    incidents: DashMap<String, StoredIncident>,
    next_seq: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Snapshot of every stored incident in creation order
    pub fn snapshot(&self) -> Vec<Incident> {
        let mut stored: Vec<StoredIncident> =
            self.incidents.iter().map(|r| r.value().clone()).collect();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| s.incident).collect()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        if self.incidents.contains_key(&incident.id) {
            return Err(StoreError::Backend(format!(
                "incident {} already exists",
                incident.id
            )));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        debug!(incident_id = %incident.id, seq, "Storing incident");
        self.incidents.insert(
            incident.id.clone(),
            StoredIncident {
                seq,
                incident: incident.clone(),
            },
        );
        Ok(())
    }

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        match self.incidents.get_mut(&incident.id) {
            Some(mut entry) => {
                entry.incident = incident.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(incident.id.clone())),
        }
    }

    async fn read_incident(&self, id: &str) -> Result<Incident, StoreError> {
        self.incidents
            .get(id)
            .map(|r| r.incident.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_incidents(
        &self,
        filter: &IncidentFilter,
        pagination: Pagination,
    ) -> Result<Page<Incident>, StoreError> {
        let mut matching: Vec<StoredIncident> = self
            .incidents
            .iter()
            .filter(|r| filter.matches(&r.incident))
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by_key(|s| s.seq);

        let total = matching.len();
        let items: Vec<Incident> = matching
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.page_size)
            .map(|s| s.incident)
            .collect();
        let has_more = pagination.offset() + items.len() < total;

        Ok(Page {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentStatus, InvolvedObject, ObjectKind, Severity};
    use crate::store::list_all;
    use chrono::Utc;

    fn incident(id: &str, release: &str, status: IncidentStatus) -> Incident {
        let now = Utc::now();
        Incident {
            id: id.to_string(),
            release_name: release.to_string(),
            release_namespace: "default".to_string(),
            chart_name: format!("{release}-0.1.0"),
            involved_object: InvolvedObject {
                kind: ObjectKind::Pod,
                name: format!("{release}-0"),
                namespace: "default".to_string(),
            },
            severity: Severity::Normal,
            status,
            created_at: now,
            last_seen: now,
            last_alerted: None,
            resolved_time: None,
            resolved_retry_count: 0,
            events: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_read_update() {
        let repo = MemoryRepository::new();
        let mut inc = incident("a", "web", IncidentStatus::Active);

        repo.create_incident(&inc).await.unwrap();
        assert!(repo.create_incident(&inc).await.is_err());

        inc.resolved_retry_count = 2;
        repo.update_incident(&inc).await.unwrap();
        assert_eq!(repo.read_incident("a").await.unwrap().resolved_retry_count, 2);
    }

    #[tokio::test]
    async fn test_missing_incident() {
        let repo = MemoryRepository::new();
        let inc = incident("missing", "web", IncidentStatus::Active);

        assert_eq!(
            repo.read_incident("missing").await.unwrap_err(),
            StoreError::NotFound("missing".to_string())
        );
        assert!(matches!(
            repo.update_incident(&inc).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_preserves_creation_order() {
        let repo = MemoryRepository::new();
        for id in ["c", "a", "b"] {
            repo.create_incident(&incident(id, "web", IncidentStatus::Active))
                .await
                .unwrap();
        }
        repo.create_incident(&incident("d", "web", IncidentStatus::Resolved))
            .await
            .unwrap();
        repo.create_incident(&incident("e", "api", IncidentStatus::Active))
            .await
            .unwrap();

        let page = repo
            .list_incidents(&IncidentFilter::active_for("web", "default"), Pagination::default())
            .await
            .unwrap();
        let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(page.total, 3);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_pagination() {
        let repo = MemoryRepository::new();
        for i in 0..5 {
            repo.create_incident(&incident(&format!("inc-{i}"), "web", IncidentStatus::Active))
                .await
                .unwrap();
        }

        let first = repo
            .list_incidents(&IncidentFilter::active(), Pagination::new(1, 2))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);

        let last = repo
            .list_incidents(&IncidentFilter::active(), Pagination::new(3, 2))
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, "inc-4");
        assert!(!last.has_more);

        let all = list_all(&repo, &IncidentFilter::active(), 2).await.unwrap();
        assert_eq!(all.len(), 5);
    }
}
