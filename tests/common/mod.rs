#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use outbox_relay::{
    application::{
        handlers::source_poller::SourcePoller,
        services::{
            backoff::RetryPolicy,
            publisher::{EventPublisher, message_id_for},
            staleness::StalenessTracker,
        },
    },
    domain::models::{OutboxRow, RowId, SourceDescriptor, SourceKey, TopicRule},
    infrastructure::{
        messaging::in_memory::InMemoryMessageBus, metrics::prometheus::PrometheusMetrics,
        repositories::in_memory::InMemoryOutboxRepository,
    },
};
use serde_json::json;

pub fn source(namespace: &str) -> SourceDescriptor {
    let mut source = SourceDescriptor::new(namespace, "outbox", "published_at");
    source.topic = TopicRule::EventType {
        prefix: Some(format!("{namespace}.")),
    };
    source
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn row(id: &str, created_offset_secs: i64) -> OutboxRow {
    OutboxRow {
        id: RowId::from(id),
        aggregate_id: format!("aggregate-{id}"),
        aggregate_type: "Order".to_string(),
        event_type: "OrderPlaced".to_string(),
        payload: json!({ "row": id }),
        created_at: base_time() + chrono::Duration::seconds(created_offset_secs),
        completed_at: None,
        correlation_id: None,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// One relay process over in-memory adapters.
pub struct Harness {
    pub database: InMemoryOutboxRepository,
    pub bus: InMemoryMessageBus,
    pub tracker: Arc<StalenessTracker>,
    pub metrics: Arc<PrometheusMetrics>,
    pub publisher: Arc<EventPublisher>,
}

impl Harness {
    pub fn new(sources: &[&SourceDescriptor]) -> Self {
        let bus = InMemoryMessageBus::new();
        Self {
            database: InMemoryOutboxRepository::new(),
            publisher: Arc::new(EventPublisher::new(Arc::new(bus.clone()), fast_retry())),
            bus,
            tracker: Arc::new(StalenessTracker::new(
                sources.iter().map(|source| source.key()),
            )),
            metrics: Arc::new(PrometheusMetrics::new().unwrap()),
        }
    }

    pub fn poller(&self, source: &SourceDescriptor) -> SourcePoller {
        SourcePoller::new(
            source.clone(),
            Arc::new(self.database.clone()),
            Arc::new(self.database.clone()),
            self.publisher.clone(),
            self.tracker.clone(),
            self.metrics.clone(),
        )
    }

    pub async fn insert(&self, source: &SourceDescriptor, rows: Vec<OutboxRow>) {
        for row in rows {
            self.database.insert(&source.key(), row).await;
        }
    }

    pub async fn published_ids(&self) -> Vec<String> {
        self.bus
            .published()
            .await
            .into_iter()
            .map(|message| message.message_id)
            .collect()
    }
}

pub fn message_id(key: &SourceKey, id: &str) -> String {
    message_id_for(key, &RowId::from(id))
}
