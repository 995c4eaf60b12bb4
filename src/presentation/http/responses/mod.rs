use poem_openapi::{ApiResponse, Object, payload::Json};

#[derive(Object, Debug)]
pub struct SourceReadinessDto {
    pub source: String,
    pub last_successful_poll_at: Option<String>,
    /// Seconds since the last successful cycle, absent if never polled.
    pub staleness_seconds: Option<f64>,
    pub stale: bool,
}

#[derive(Object, Debug)]
pub struct ReadinessDto {
    pub ready: bool,
    pub database_reachable: bool,
    pub database_error: Option<String>,
    pub freshness_window_seconds: u64,
    pub stale_sources: Vec<String>,
    pub sources: Vec<SourceReadinessDto>,
    pub checked_at: String,
}

#[derive(ApiResponse)]
pub enum ReadinessResponse {
    #[oai(status = 200)]
    Ready(Json<ReadinessDto>),
    #[oai(status = 503)]
    NotReady(Json<ReadinessDto>),
}
