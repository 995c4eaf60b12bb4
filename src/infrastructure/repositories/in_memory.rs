use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{
    models::{OutboxRow, RowId, SourceDescriptor, SourceKey},
    repositories::{CompletionWriter, DatabaseProbe, HeartbeatStore, OutboxReader},
};

#[derive(Default)]
struct OutboxState {
    tables: HashMap<SourceKey, Vec<OutboxRow>>,
    failing_reads: HashSet<SourceKey>,
    failing_completions: HashSet<SourceKey>,
    unreachable: bool,
    read_delay: Option<Duration>,
}

/// Outbox tables held in memory, with switches to simulate database faults.
#[derive(Default, Clone)]
pub struct InMemoryOutboxRepository {
    state: Arc<RwLock<OutboxState>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, source: &SourceKey, row: OutboxRow) {
        let mut state = self.state.write().await;
        state.tables.entry(source.clone()).or_default().push(row);
    }

    pub async fn row(&self, source: &SourceKey, id: &RowId) -> Option<OutboxRow> {
        let state = self.state.read().await;
        state
            .tables
            .get(source)
            .and_then(|rows| rows.iter().find(|row| &row.id == id))
            .cloned()
    }

    pub async fn pending_ids(&self, source: &SourceKey) -> Vec<RowId> {
        let state = self.state.read().await;
        let mut rows: Vec<&OutboxRow> = state
            .tables
            .get(source)
            .map(|rows| rows.iter().filter(|row| row.is_candidate()).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        rows.into_iter().map(|row| row.id.clone()).collect()
    }

    pub async fn fail_reads(&self, source: &SourceKey, failing: bool) {
        let mut state = self.state.write().await;
        toggle(&mut state.failing_reads, source, failing);
    }

    pub async fn fail_completions(&self, source: &SourceKey, failing: bool) {
        let mut state = self.state.write().await;
        toggle(&mut state.failing_completions, source, failing);
    }

    pub async fn set_reachable(&self, reachable: bool) {
        self.state.write().await.unreachable = !reachable;
    }

    /// Makes every read take `delay` before returning.
    pub async fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.write().await.read_delay = delay;
    }
}

fn toggle(set: &mut HashSet<SourceKey>, source: &SourceKey, on: bool) {
    if on {
        set.insert(source.clone());
    } else {
        set.remove(source);
    }
}

#[async_trait]
impl OutboxReader for InMemoryOutboxRepository {
    async fn fetch_batch(&self, source: &SourceDescriptor) -> anyhow::Result<Vec<OutboxRow>> {
        let delay = self.state.read().await.read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let key = source.key();
        let state = self.state.read().await;
        if state.unreachable || state.failing_reads.contains(&key) {
            anyhow::bail!("simulated read failure for {key}");
        }
        let mut rows: Vec<OutboxRow> = state
            .tables
            .get(&key)
            .map(|rows| rows.iter().filter(|row| row.is_candidate()).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        rows.truncate(source.batch_size as usize);
        Ok(rows)
    }
}

#[async_trait]
impl CompletionWriter for InMemoryOutboxRepository {
    async fn mark_completed(
        &self,
        source: &SourceDescriptor,
        ids: &[RowId],
    ) -> anyhow::Result<u64> {
        let key = source.key();
        let mut state = self.state.write().await;
        if state.unreachable || state.failing_completions.contains(&key) {
            anyhow::bail!("simulated completion failure for {key}");
        }
        let ids: HashSet<&RowId> = ids.iter().collect();
        let now = Utc::now();
        let mut updated = 0;
        if let Some(rows) = state.tables.get_mut(&key) {
            for row in rows
                .iter_mut()
                .filter(|row| row.completed_at.is_none() && ids.contains(&row.id))
            {
                row.completed_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl DatabaseProbe for InMemoryOutboxRepository {
    async fn ping(&self) -> anyhow::Result<()> {
        if self.state.read().await.unreachable {
            anyhow::bail!("database unreachable");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHeartbeatStore {
    heartbeats: Arc<RwLock<HashMap<SourceKey, DateTime<Utc>>>>,
}

impl InMemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeartbeatStore for InMemoryHeartbeatStore {
    async fn load(&self) -> anyhow::Result<HashMap<SourceKey, DateTime<Utc>>> {
        Ok(self.heartbeats.read().await.clone())
    }

    async fn record(&self, source: &SourceKey, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut heartbeats = self.heartbeats.write().await;
        let entry = heartbeats.entry(source.clone()).or_insert(at);
        *entry = (*entry).max(at);
        Ok(())
    }
}
