use poem::error::InternalServerError;
use poem_openapi::{OpenApi, payload::PlainText};

use crate::presentation::http::endpoints::root::{ApiState, EndpointsTags};

pub struct MetricsEndpoints {
    pub state: ApiState,
}

#[OpenApi]
impl MetricsEndpoints {
    /// Prometheus text exposition of the relay counters.
    #[oai(path = "/metrics", method = "get", tag = EndpointsTags::Metrics)]
    pub async fn metrics(&self) -> poem::Result<PlainText<String>> {
        let body = self
            .state
            .metrics
            .render()
            .map_err(|err| InternalServerError(std::io::Error::other(err.to_string())))?;
        Ok(PlainText(body))
    }
}
