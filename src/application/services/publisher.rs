use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::{
    application::services::{
        backoff::RetryPolicy,
        event_bus::{BrokerMessage, MessageBus},
    },
    domain::models::{OutboxRow, RowId, SourceDescriptor, SourceKey},
};

pub const HEADER_EVENT_TYPE: &str = "event-type";
pub const HEADER_AGGREGATE_TYPE: &str = "aggregate-type";
pub const HEADER_AGGREGATE_ID: &str = "aggregate-id";
pub const HEADER_CREATED_AT: &str = "created-at";
pub const HEADER_SOURCE: &str = "source";
pub const HEADER_CORRELATION_ID: &str = "correlation-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Failed(String),
}

/// Wire body of a relayed event.
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    id: &'a RowId,
    source: &'a SourceKey,
    aggregate_id: &'a str,
    aggregate_type: &'a str,
    event_type: &'a str,
    payload: &'a Value,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
}

/// Stable broker-side identity of a row: `namespace.table:id`.
pub fn message_id_for(source: &SourceKey, id: &RowId) -> String {
    format!("{source}:{id}")
}

pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
    retry: RetryPolicy,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, retry: RetryPolicy) -> Self {
        Self { bus, retry }
    }

    pub fn build_message(
        source: &SourceDescriptor,
        row: &OutboxRow,
    ) -> Result<BrokerMessage, serde_json::Error> {
        let key = source.key();
        let envelope = EventEnvelope {
            id: &row.id,
            source: &key,
            aggregate_id: &row.aggregate_id,
            aggregate_type: &row.aggregate_type,
            event_type: &row.event_type,
            payload: &row.payload,
            created_at: row.created_at,
            correlation_id: row.correlation_id.as_deref(),
        };
        let body = serde_json::to_vec(&envelope)?;

        let mut headers = BTreeMap::new();
        headers.insert(HEADER_EVENT_TYPE.to_string(), row.event_type.clone());
        headers.insert(HEADER_AGGREGATE_TYPE.to_string(), row.aggregate_type.clone());
        headers.insert(HEADER_AGGREGATE_ID.to_string(), row.aggregate_id.clone());
        headers.insert(
            HEADER_CREATED_AT.to_string(),
            row.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        );
        headers.insert(HEADER_SOURCE.to_string(), key.to_string());
        if let Some(correlation_id) = row.correlation_id.as_deref().filter(|c| !c.is_empty()) {
            headers.insert(HEADER_CORRELATION_ID.to_string(), correlation_id.to_string());
        }

        Ok(BrokerMessage {
            topic: source.topic.topic_for(row),
            partition_key: row.aggregate_id.clone(),
            message_id: message_id_for(&key, &row.id),
            headers,
            body,
        })
    }

    /// Publishes one row, retrying transient broker errors with backoff.
    /// Always terminates after at most `max_attempts` broker calls.
    pub async fn publish(&self, source: &SourceDescriptor, row: &OutboxRow) -> PublishOutcome {
        let message = match Self::build_message(source, row) {
            Ok(message) => message,
            Err(err) => return PublishOutcome::Failed(format!("serialization failed: {err}")),
        };
        if message.topic.is_empty() {
            return PublishOutcome::Failed("topic rule produced an empty topic".to_string());
        }

        let mut attempt = 1;
        loop {
            match self.bus.publish(message.clone()).await {
                Ok(()) => return PublishOutcome::Delivered,
                Err(err) if err.is_transient() && self.retry.can_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        row_id = %row.id,
                        topic = %message.topic,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "publish failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return PublishOutcome::Failed(err.to_string()),
            }
        }
    }
}
