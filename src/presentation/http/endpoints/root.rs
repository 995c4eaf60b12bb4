use std::sync::Arc;

use poem_openapi::Tags;

use crate::{
    application::usecases::check_readiness::CheckReadinessUseCase,
    infrastructure::metrics::prometheus::PrometheusMetrics,
    presentation::http::endpoints::{health::HealthEndpoints, metrics::MetricsEndpoints},
};

#[derive(Clone)]
pub struct ApiState {
    pub readiness_usecase: Arc<CheckReadinessUseCase>,
    pub metrics: Arc<PrometheusMetrics>,
}

/// Enum of API sections (tags)
#[derive(Tags)]
pub enum EndpointsTags {
    Health,
    Metrics,
}

pub fn endpoints(state: ApiState) -> (HealthEndpoints, MetricsEndpoints) {
    (
        HealthEndpoints {
            state: state.clone(),
        },
        MetricsEndpoints { state },
    )
}
