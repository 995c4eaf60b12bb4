use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    application::{handlers::source_poller::SourcePoller, services::metrics::MetricsSink},
    domain::models::SourceKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Running,
}

/// `Idle`/`Running` state of one source plus its overlap counter.
#[derive(Debug, Default)]
pub struct SourceSlot {
    running: AtomicBool,
    overlaps: AtomicU64,
}

impl SourceSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> SourceState {
        if self.running.load(Ordering::Acquire) {
            SourceState::Running
        } else {
            SourceState::Idle
        }
    }

    /// `Idle → Running`. Returns `None` if a cycle is already running; the
    /// returned guard moves the slot back to `Idle` when dropped.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard { slot: self.clone() })
    }

    pub fn overlaps(&self) -> u64 {
        self.overlaps.load(Ordering::Relaxed)
    }

    fn record_overlap(&self) -> u64 {
        self.overlaps.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct RunningGuard {
    slot: Arc<SourceSlot>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.slot.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDiagnostics {
    pub source: SourceKey,
    pub state: SourceState,
    pub overlaps: u64,
}

struct ScheduledSource {
    poller: Arc<SourcePoller>,
    slot: Arc<SourceSlot>,
}

/// Drives every configured source on its own timer.
pub struct RelayScheduler {
    sources: Vec<ScheduledSource>,
    metrics: Arc<dyn MetricsSink>,
    shutdown_grace: Duration,
}

impl RelayScheduler {
    pub fn new(
        pollers: Vec<SourcePoller>,
        metrics: Arc<dyn MetricsSink>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            sources: pollers
                .into_iter()
                .map(|poller| ScheduledSource {
                    poller: Arc::new(poller),
                    slot: SourceSlot::new(),
                })
                .collect(),
            metrics,
            shutdown_grace,
        }
    }

    pub fn diagnostics(&self) -> Vec<SourceDiagnostics> {
        self.sources
            .iter()
            .map(|source| SourceDiagnostics {
                source: source.poller.source().key(),
                state: source.slot.state(),
                overlaps: source.slot.overlaps(),
            })
            .collect()
    }

    pub fn slot(&self, key: &SourceKey) -> Option<Arc<SourceSlot>> {
        self.sources
            .iter()
            .find(|source| &source.poller.source().key() == key)
            .map(|source| source.slot.clone())
    }

    /// Runs until `shutdown` is cancelled, then waits up to the grace period
    /// for in-flight cycles before aborting them.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(sources = self.sources.len(), "relay scheduler starting");

        let drivers: Vec<JoinHandle<Option<JoinHandle<()>>>> = self
            .sources
            .iter()
            .map(|source| {
                tokio::spawn(drive(
                    source.poller.clone(),
                    source.slot.clone(),
                    self.metrics.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        let mut in_flight = Vec::new();
        for driver in join_all(drivers).await {
            match driver {
                Ok(Some(cycle)) => in_flight.push(cycle),
                Ok(None) => {}
                Err(err) => error!(error = %err, "source driver task failed"),
            }
        }

        if in_flight.is_empty() {
            info!("relay scheduler stopped");
            return;
        }

        info!(
            in_flight = in_flight.len(),
            grace_ms = self.shutdown_grace.as_millis() as u64,
            "waiting for in-flight poll cycles"
        );
        let aborts: Vec<_> = in_flight.iter().map(JoinHandle::abort_handle).collect();
        if timeout(self.shutdown_grace, join_all(in_flight))
            .await
            .is_err()
        {
            warn!("grace period elapsed, aborting in-flight poll cycles");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("relay scheduler stopped");
    }
}

/// Ticks one source until shutdown. Returns the cycle still running at that
/// point, if any.
async fn drive(
    poller: Arc<SourcePoller>,
    slot: Arc<SourceSlot>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let key = poller.source().key();
    let mut ticker = interval(poller.source().poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match slot.try_begin() {
            Some(guard) => {
                let poller = poller.clone();
                in_flight = Some(tokio::spawn(async move {
                    let _guard = guard;
                    poller.poll_once().await;
                }));
            }
            None => {
                let overlaps = slot.record_overlap();
                metrics.cycle_overlapped(&key);
                warn!(source = %key, overlaps, "previous poll cycle still running, skipping tick");
            }
        }
    }

    debug!(source = %key, "stopped issuing ticks");
    in_flight.filter(|cycle| !cycle.is_finished())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_allows_one_running_cycle() {
        let slot = SourceSlot::new();
        assert_eq!(slot.state(), SourceState::Idle);

        let guard = slot.try_begin().expect("idle slot should start");
        assert_eq!(slot.state(), SourceState::Running);
        assert!(slot.try_begin().is_none());

        drop(guard);
        assert_eq!(slot.state(), SourceState::Idle);
        assert!(slot.try_begin().is_some());
    }
}
