use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::{models::SourceKey, repositories::HeartbeatStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessEntry {
    pub source: SourceKey,
    /// `None` until the first successful cycle (or a seeded heartbeat).
    pub last_successful_poll_at: Option<DateTime<Utc>>,
}

/// Last successful poll time per source, shared between the pollers and the
/// readiness check.
pub struct StalenessTracker {
    entries: RwLock<BTreeMap<SourceKey, Option<DateTime<Utc>>>>,
    store: Option<Arc<dyn HeartbeatStore>>,
}

impl StalenessTracker {
    pub fn new(sources: impl IntoIterator<Item = SourceKey>) -> Self {
        Self {
            entries: RwLock::new(sources.into_iter().map(|key| (key, None)).collect()),
            store: None,
        }
    }

    /// Persists every successful poll to `store`, so the next process can
    /// seed from it.
    pub fn with_store(mut self, store: Arc<dyn HeartbeatStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Loads persisted heartbeats for the configured sources. Unknown sources
    /// in the store are ignored.
    pub async fn seed_from_store(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let persisted = store.load().await?;
        let mut entries = self.entries.write().await;
        let mut seeded = 0;
        for (key, last) in entries.iter_mut() {
            if let Some(at) = persisted.get(key) {
                *last = newest(*last, *at);
                seeded += 1;
            }
        }
        info!(seeded, "seeded staleness tracker from persisted heartbeats");
        Ok(seeded)
    }

    /// Records a successful cycle. Never moves a source's timestamp backwards.
    pub async fn record_success(&self, source: &SourceKey, at: DateTime<Utc>) {
        {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(source.clone()).or_insert(None);
            *entry = newest(*entry, at);
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.record(source, at).await {
                warn!(source = %source, error = %err, "failed to persist heartbeat");
            }
        }
    }

    pub async fn last_success(&self, source: &SourceKey) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(source).copied().flatten()
    }

    pub async fn snapshot(&self) -> Vec<StalenessEntry> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(source, last)| StalenessEntry {
                source: source.clone(),
                last_successful_poll_at: *last,
            })
            .collect()
    }
}

fn newest(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(current.map_or(candidate, |current| current.max(candidate)))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::infrastructure::repositories::in_memory::InMemoryHeartbeatStore;

    fn key(table: &str) -> SourceKey {
        SourceKey::new("svc", table)
    }

    #[tokio::test]
    async fn starts_unset_for_every_source() {
        let tracker = StalenessTracker::new([key("a"), key("b")]);
        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|e| e.last_successful_poll_at.is_none()));
    }

    #[tokio::test]
    async fn never_moves_backwards() {
        let tracker = StalenessTracker::new([key("a")]);
        let now = Utc::now();
        tracker.record_success(&key("a"), now).await;
        tracker
            .record_success(&key("a"), now - Duration::seconds(5))
            .await;
        assert_eq!(tracker.last_success(&key("a")).await, Some(now));
    }

    #[tokio::test]
    async fn seeds_and_persists_through_store() {
        let store = Arc::new(InMemoryHeartbeatStore::new());
        let earlier = Utc::now() - Duration::seconds(20);
        store.record(&key("a"), earlier).await.unwrap();
        store.record(&key("unknown"), earlier).await.unwrap();

        let tracker = StalenessTracker::new([key("a"), key("b")]).with_store(store.clone());
        assert_eq!(tracker.seed_from_store().await.unwrap(), 1);
        assert_eq!(tracker.last_success(&key("a")).await, Some(earlier));
        assert_eq!(tracker.last_success(&key("b")).await, None);

        let now = Utc::now();
        tracker.record_success(&key("b"), now).await;
        assert_eq!(store.load().await.unwrap().get(&key("b")), Some(&now));
    }
}
