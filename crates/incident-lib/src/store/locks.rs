//! Per-release serialization of incident read-modify-write cycles

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::ReleaseKey;

/// Async mutex per (release name, release namespace)
///
/// The detector and the resolver both take the lock for an incident's
/// release before reading and writing it back, so concurrent watchers and
/// the periodic sweep never interleave on the same incident.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLocks {
    locks: Arc<DashMap<ReleaseKey, Arc<Mutex<()>>>>,
}

impl ReleaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &ReleaseKey) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(&self.locks.entry(key.clone()).or_default());
        lock.lock_owned().await
    }

    /// Drop entries nobody holds or waits on. An entry is only removed
    /// while its shard is write-locked, so `lock` never observes a
    /// half-removed mutex.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of releases with a live entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(name: &str) -> ReleaseKey {
        ReleaseKey {
            name: name.to_string(),
            namespace: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn test_same_release_is_exclusive() {
        let locks = ReleaseLocks::new();
        let guard = locks.lock(&key("web")).await;

        let contender = locks.clone();
        let pending = tokio::spawn(async move {
            let _guard = contender.lock(&key("web")).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        drop(guard);
        pending.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_releases_do_not_block() {
        let locks = ReleaseLocks::new();
        let _web = locks.lock(&key("web")).await;
        let _api = tokio::time::timeout(Duration::from_millis(100), locks.lock(&key("api")))
            .await
            .expect("independent release should lock immediately");

        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_only_held_releases() {
        let locks = ReleaseLocks::new();
        drop(locks.lock(&key("api")).await);
        let web = locks.lock(&key("web")).await;
        assert_eq!(locks.len(), 2);

        locks.prune();
        assert_eq!(locks.len(), 1);

        // The held lock still excludes newcomers after pruning
        let contender = locks.clone();
        let pending = tokio::spawn(async move {
            let _guard = contender.lock(&key("web")).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        drop(web);
        pending.await.unwrap();
        locks.prune();
        assert!(locks.is_empty());
    }
}
