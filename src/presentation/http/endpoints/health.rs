use poem_openapi::{OpenApi, payload::{Json, PlainText}};

use crate::presentation::http::{
    endpoints::root::{ApiState, EndpointsTags},
    mappers::map_readiness,
    responses::ReadinessResponse,
};

pub struct HealthEndpoints {
    pub state: ApiState,
}

#[OpenApi]
impl HealthEndpoints {
    /// The process is up. Says nothing about the database or the broker.
    #[oai(path = "/health/live", method = "get", tag = EndpointsTags::Health)]
    pub async fn live(&self) -> PlainText<&'static str> {
        PlainText("OK")
    }

    /// 503 while the database is unreachable or any source is stale.
    #[oai(path = "/health/ready", method = "get", tag = EndpointsTags::Health)]
    pub async fn ready(&self) -> ReadinessResponse {
        let report = self.state.readiness_usecase.execute().await;
        let body = Json(map_readiness(&report));
        if report.ready {
            ReadinessResponse::Ready(body)
        } else {
            ReadinessResponse::NotReady(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use poem::{http::StatusCode, test::TestClient};
    use serde_json::Value;

    use crate::{
        application::{
            services::staleness::StalenessTracker,
            usecases::check_readiness::CheckReadinessUseCase,
        },
        domain::models::SourceKey,
        infrastructure::{
            metrics::prometheus::PrometheusMetrics,
            repositories::in_memory::InMemoryOutboxRepository,
        },
        presentation::http::{endpoints::root::ApiState, routes},
    };

    fn state(
        database: &InMemoryOutboxRepository,
        tracker: Arc<StalenessTracker>,
    ) -> ApiState {
        ApiState {
            readiness_usecase: Arc::new(CheckReadinessUseCase::new(
                Arc::new(database.clone()),
                tracker,
                Duration::from_secs(30),
            )),
            metrics: Arc::new(PrometheusMetrics::new().unwrap()),
        }
    }

    #[tokio::test]
    async fn live_answers_even_when_database_is_down() {
        let database = InMemoryOutboxRepository::new();
        database.set_reachable(false).await;
        let tracker = Arc::new(StalenessTracker::new([]));
        let cli = TestClient::new(routes(state(&database, tracker), "http://localhost:8080"));

        let resp = cli.get("/api/health/live").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("OK").await;
    }

    #[tokio::test]
    async fn ready_is_503_and_names_the_stale_source() {
        let orders = SourceKey::new("orders", "outbox");
        let billing = SourceKey::new("billing", "outbox");
        let database = InMemoryOutboxRepository::new();
        let tracker = Arc::new(StalenessTracker::new([orders.clone(), billing.clone()]));
        tracker
            .record_success(&orders, Utc::now() - chrono::Duration::seconds(45))
            .await;
        tracker.record_success(&billing, Utc::now()).await;
        let cli = TestClient::new(routes(state(&database, tracker), "http://localhost:8080"));

        let resp = cli.get("/api/health/ready").send().await;
        resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = resp.0.into_body().into_json().await.unwrap();
        assert_eq!(body["ready"], Value::Bool(false));
        assert_eq!(body["database_reachable"], Value::Bool(true));
        assert_eq!(body["stale_sources"], serde_json::json!(["orders.outbox"]));
    }

    #[tokio::test]
    async fn ready_is_200_when_every_source_is_fresh() {
        let orders = SourceKey::new("orders", "outbox");
        let database = InMemoryOutboxRepository::new();
        let tracker = Arc::new(StalenessTracker::new([orders.clone()]));
        tracker
            .record_success(&orders, Utc::now() - chrono::Duration::seconds(10))
            .await;
        let cli = TestClient::new(routes(state(&database, tracker), "http://localhost:8080"));

        let resp = cli.get("/api/health/ready").send().await;
        resp.assert_status_is_ok();
        let body: Value = resp.0.into_body().into_json().await.unwrap();
        assert_eq!(body["ready"], Value::Bool(true));
        assert_eq!(body["sources"][0]["stale"], Value::Bool(false));
    }

    #[tokio::test]
    async fn metrics_are_exposed_as_text() {
        let database = InMemoryOutboxRepository::new();
        let tracker = Arc::new(StalenessTracker::new([]));
        let state = state(&database, tracker);
        state
            .metrics
            .cycle_overlaps
            .with_label_values(&["orders.outbox"])
            .inc();
        let cli = TestClient::new(routes(state, "http://localhost:8080"));

        let resp = cli.get("/api/metrics").send().await;
        resp.assert_status_is_ok();
        let text = resp.0.into_body().into_string().await.unwrap();
        assert!(text.contains("poll_cycle_overlaps_total{source=\"orders.outbox\"} 1"));
    }
}
