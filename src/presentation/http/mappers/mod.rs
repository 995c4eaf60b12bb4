use crate::{
    application::usecases::check_readiness::{ReadinessReport, SourceReadiness},
    presentation::http::responses::{ReadinessDto, SourceReadinessDto},
};

pub fn map_readiness(report: &ReadinessReport) -> ReadinessDto {
    ReadinessDto {
        ready: report.ready,
        database_reachable: report.database_reachable,
        database_error: report.database_error.clone(),
        freshness_window_seconds: report.freshness_window.as_secs(),
        stale_sources: report.stale_sources().map(ToString::to_string).collect(),
        sources: report.sources.iter().map(map_source).collect(),
        checked_at: report.checked_at.to_rfc3339(),
    }
}

fn map_source(source: &SourceReadiness) -> SourceReadinessDto {
    SourceReadinessDto {
        source: source.source.to_string(),
        last_successful_poll_at: source.last_successful_poll_at.map(|at| at.to_rfc3339()),
        staleness_seconds: source.staleness.map(|age| age.as_secs_f64()),
        stale: source.stale,
    }
}
