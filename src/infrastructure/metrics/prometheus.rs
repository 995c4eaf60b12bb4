use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::{
    application::services::metrics::MetricsSink,
    domain::models::{PollCycleResult, SourceDescriptor, SourceKey},
};

const EVENT_LABELS: &[&str] = &["namespace", "table", "event_type"];

/// Relay metrics registered on a dedicated Prometheus registry.
pub struct PrometheusMetrics {
    registry: Registry,
    pub events_polled: IntCounterVec,
    pub events_published: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub poll_latency: HistogramVec,
    pub poll_cycles: IntCounterVec,
    pub cycle_overlaps: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_polled = IntCounterVec::new(
            Opts::new("events_polled_total", "Outbox rows read as publish candidates"),
            EVENT_LABELS,
        )?;
        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Outbox rows acknowledged by the broker"),
            EVENT_LABELS,
        )?;
        let events_failed = IntCounterVec::new(
            Opts::new("events_failed_total", "Outbox rows the broker did not accept"),
            EVENT_LABELS,
        )?;
        let poll_latency = HistogramVec::new(
            HistogramOpts::new("poll_latency_seconds", "Duration of one poll cycle").buckets(
                vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            ),
            &["source"],
        )?;
        let poll_cycles = IntCounterVec::new(
            Opts::new("poll_cycles_total", "Poll cycles by outcome"),
            &["source", "outcome"],
        )?;
        let cycle_overlaps = IntCounterVec::new(
            Opts::new(
                "poll_cycle_overlaps_total",
                "Ticks skipped because the previous cycle was still running",
            ),
            &["source"],
        )?;

        registry.register(Box::new(events_polled.clone()))?;
        registry.register(Box::new(events_published.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(poll_latency.clone()))?;
        registry.register(Box::new(poll_cycles.clone()))?;
        registry.register(Box::new(cycle_overlaps.clone()))?;

        Ok(Self {
            registry,
            events_polled,
            events_published,
            events_failed,
            poll_latency,
            poll_cycles,
            cycle_overlaps,
        })
    }

    /// Text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn events_polled(&self, source: &SourceDescriptor, event_type: &str, count: u64) {
        self.events_polled
            .with_label_values(&[&source.namespace, &source.table, event_type])
            .inc_by(count);
    }

    fn event_published(&self, source: &SourceDescriptor, event_type: &str) {
        self.events_published
            .with_label_values(&[&source.namespace, &source.table, event_type])
            .inc();
    }

    fn event_failed(&self, source: &SourceDescriptor, event_type: &str) {
        self.events_failed
            .with_label_values(&[&source.namespace, &source.table, event_type])
            .inc();
    }

    fn cycle_finished(&self, result: &PollCycleResult) {
        let source = result.source.as_str();
        self.poll_latency
            .with_label_values(&[source])
            .observe(result.elapsed.as_secs_f64());
        self.poll_cycles
            .with_label_values(&[source, result.outcome_label()])
            .inc();
    }

    fn cycle_overlapped(&self, source: &SourceKey) {
        self.cycle_overlaps.with_label_values(&[source.as_str()]).inc();
    }
}
