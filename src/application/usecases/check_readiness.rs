use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    application::services::staleness::StalenessTracker,
    domain::{models::SourceKey, repositories::DatabaseProbe},
};

pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReadiness {
    pub source: SourceKey,
    pub last_successful_poll_at: Option<DateTime<Utc>>,
    pub staleness: Option<Duration>,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessReport {
    pub ready: bool,
    pub database_reachable: bool,
    pub database_error: Option<String>,
    pub sources: Vec<SourceReadiness>,
    pub freshness_window: Duration,
    pub checked_at: DateTime<Utc>,
}

impl ReadinessReport {
    pub fn stale_sources(&self) -> impl Iterator<Item = &SourceKey> {
        self.sources.iter().filter(|s| s.stale).map(|s| &s.source)
    }
}

/// Ready means: the database answers and no source has gone longer than the
/// freshness window without a successful cycle.
pub struct CheckReadinessUseCase {
    probe: Arc<dyn DatabaseProbe>,
    tracker: Arc<StalenessTracker>,
    freshness_window: Duration,
}

impl CheckReadinessUseCase {
    pub fn new(
        probe: Arc<dyn DatabaseProbe>,
        tracker: Arc<StalenessTracker>,
        freshness_window: Duration,
    ) -> Self {
        Self {
            probe,
            tracker,
            freshness_window,
        }
    }

    pub async fn execute(&self) -> ReadinessReport {
        self.execute_at(Utc::now()).await
    }

    pub async fn execute_at(&self, now: DateTime<Utc>) -> ReadinessReport {
        let database_error = self.probe.ping().await.err().map(|err| format!("{err:#}"));

        let sources: Vec<SourceReadiness> = self
            .tracker
            .snapshot()
            .await
            .into_iter()
            .map(|entry| {
                // A timestamp ahead of `now` (clock skew) counts as fresh.
                let staleness = entry
                    .last_successful_poll_at
                    .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO));
                let stale = staleness.is_none_or(|age| age > self.freshness_window);
                SourceReadiness {
                    source: entry.source,
                    last_successful_poll_at: entry.last_successful_poll_at,
                    staleness,
                    stale,
                }
            })
            .collect();

        ReadinessReport {
            ready: database_error.is_none() && sources.iter().all(|s| !s.stale),
            database_reachable: database_error.is_none(),
            database_error,
            sources,
            freshness_window: self.freshness_window,
            checked_at: now,
        }
    }
}
