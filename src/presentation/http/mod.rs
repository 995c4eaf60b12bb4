use poem::Route;
use poem_openapi::OpenApiService;

use crate::presentation::http::endpoints::root::{ApiState, endpoints};

pub mod endpoints;
pub mod mappers;
pub mod responses;

/// OpenAPI service under `/api`, Swagger UI at `/`.
pub fn routes(state: ApiState, server_url: &str) -> Route {
    let api_service = OpenApiService::new(endpoints(state), "Outbox Relay API", "0.1.0")
        .server(format!("{server_url}/api"));
    let ui = api_service.swagger_ui();
    Route::new().nest("/api", api_service).nest("/", ui)
}
