use crate::domain::models::{PollCycleResult, SourceDescriptor, SourceKey};

/// Counters and histograms fed by the relay.
pub trait MetricsSink: Send + Sync {
    fn events_polled(&self, source: &SourceDescriptor, event_type: &str, count: u64);
    fn event_published(&self, source: &SourceDescriptor, event_type: &str);
    fn event_failed(&self, source: &SourceDescriptor, event_type: &str);
    fn cycle_finished(&self, result: &PollCycleResult);
    fn cycle_overlapped(&self, source: &SourceKey);
}
