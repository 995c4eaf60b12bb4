use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::models::{OutboxRow, RowId, SourceDescriptor, SourceKey};

#[async_trait]
pub trait OutboxReader: Send + Sync {
    /// Up to `batch_size` candidate rows, oldest first. Errors abort the whole
    /// batch.
    async fn fetch_batch(&self, source: &SourceDescriptor) -> anyhow::Result<Vec<OutboxRow>>;
}

#[async_trait]
pub trait CompletionWriter: Send + Sync {
    /// Sets the completion marker on `ids` where it is still unset and returns
    /// the number of rows changed. Already-completed ids are skipped silently.
    async fn mark_completed(
        &self,
        source: &SourceDescriptor,
        ids: &[RowId],
    ) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<HashMap<SourceKey, DateTime<Utc>>>;
    async fn record(&self, source: &SourceKey, at: DateTime<Utc>) -> anyhow::Result<()>;
}
