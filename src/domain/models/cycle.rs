use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::SourceKey;

/// Outcome of one read-publish-complete pass over a single source.
#[derive(Debug, Clone)]
pub struct PollCycleResult {
    pub cycle_id: Uuid,
    pub source: SourceKey,
    pub rows_read: usize,
    pub rows_published: usize,
    pub rows_failed: usize,
    /// Rows the completion write actually changed. Lower than
    /// `rows_published` when another writer already completed some of them.
    pub rows_completed: u64,
    pub cycle_started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub cycle_succeeded: bool,
    pub failure: Option<String>,
}

impl PollCycleResult {
    pub fn outcome_label(&self) -> &'static str {
        if self.cycle_succeeded {
            "success"
        } else {
            "failure"
        }
    }
}
