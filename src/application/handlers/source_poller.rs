use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    application::services::{
        metrics::MetricsSink,
        publisher::{EventPublisher, PublishOutcome},
        staleness::StalenessTracker,
    },
    domain::{
        models::{PollCycleResult, SourceDescriptor},
        repositories::{CompletionWriter, OutboxReader},
    },
};

/// Errors that fail a whole cycle. Per-row publish failures are not among
/// them: those rows simply stay candidates.
#[derive(Debug, Error)]
enum CycleError {
    #[error("outbox read failed: {0:#}")]
    Read(anyhow::Error),
    #[error("completion write failed for {delivered} delivered rows: {reason:#}")]
    Complete {
        delivered: usize,
        reason: anyhow::Error,
    },
}

#[derive(Default)]
struct Tally {
    read: usize,
    published: usize,
    failed: usize,
    completed: u64,
}

/// Runs read → publish → complete cycles for a single source.
pub struct SourcePoller {
    source: SourceDescriptor,
    reader: Arc<dyn OutboxReader>,
    writer: Arc<dyn CompletionWriter>,
    publisher: Arc<EventPublisher>,
    tracker: Arc<StalenessTracker>,
    metrics: Arc<dyn MetricsSink>,
}

impl SourcePoller {
    pub fn new(
        source: SourceDescriptor,
        reader: Arc<dyn OutboxReader>,
        writer: Arc<dyn CompletionWriter>,
        publisher: Arc<EventPublisher>,
        tracker: Arc<StalenessTracker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            source,
            reader,
            writer,
            publisher,
            tracker,
            metrics,
        }
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub async fn poll_once(&self) -> PollCycleResult {
        let cycle_id = Uuid::new_v4();
        let key = self.source.key();
        let span = info_span!("poll_cycle", source = %key, cycle_id = %cycle_id);

        async move {
            let cycle_started_at = Utc::now();
            let started = Instant::now();
            let mut tally = Tally::default();
            let outcome = self.run_cycle(&mut tally).await;

            let result = PollCycleResult {
                cycle_id,
                source: key.clone(),
                rows_read: tally.read,
                rows_published: tally.published,
                rows_failed: tally.failed,
                rows_completed: tally.completed,
                cycle_started_at,
                elapsed: started.elapsed(),
                cycle_succeeded: outcome.is_ok(),
                failure: outcome.err().map(|err| err.to_string()),
            };

            if result.cycle_succeeded {
                self.tracker.record_success(&key, cycle_started_at).await;
                if result.rows_read > 0 {
                    info!(
                        rows_read = result.rows_read,
                        rows_published = result.rows_published,
                        rows_failed = result.rows_failed,
                        rows_completed = result.rows_completed,
                        elapsed_ms = result.elapsed.as_millis() as u64,
                        "poll cycle finished"
                    );
                } else {
                    debug!("poll cycle found no pending events");
                }
            } else {
                warn!(
                    rows_read = result.rows_read,
                    rows_published = result.rows_published,
                    error = result.failure.as_deref().unwrap_or_default(),
                    "poll cycle failed, will retry on next tick"
                );
            }

            self.metrics.cycle_finished(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn run_cycle(&self, tally: &mut Tally) -> Result<(), CycleError> {
        let rows = self
            .reader
            .fetch_batch(&self.source)
            .await
            .map_err(CycleError::Read)?;
        tally.read = rows.len();
        if rows.is_empty() {
            return Ok(());
        }

        let mut polled: BTreeMap<&str, u64> = BTreeMap::new();
        for row in &rows {
            *polled.entry(row.event_type.as_str()).or_default() += 1;
        }
        for (event_type, count) in polled {
            self.metrics.events_polled(&self.source, event_type, count);
        }

        // Each row stands alone: a failure does not stop later rows.
        let mut delivered = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.publisher.publish(&self.source, row).await {
                PublishOutcome::Delivered => {
                    self.metrics.event_published(&self.source, &row.event_type);
                    delivered.push(row.id.clone());
                }
                PublishOutcome::Failed(reason) => {
                    self.metrics.event_failed(&self.source, &row.event_type);
                    tally.failed += 1;
                    warn!(
                        row_id = %row.id,
                        event_type = %row.event_type,
                        aggregate_id = %row.aggregate_id,
                        reason = %reason,
                        "event not delivered, leaving it pending"
                    );
                }
            }
        }
        tally.published = delivered.len();
        if delivered.is_empty() {
            return Ok(());
        }

        tally.completed = self
            .writer
            .mark_completed(&self.source, &delivered)
            .await
            .map_err(|reason| CycleError::Complete {
                delivered: delivered.len(),
                reason,
            })?;
        if tally.completed < delivered.len() as u64 {
            debug!(
                delivered = delivered.len(),
                completed = tally.completed,
                "some delivered rows were already marked completed"
            );
        }
        Ok(())
    }
}
