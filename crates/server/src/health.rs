use axum::{Json, Router, routing::get};
use config::HealthConfig;
use http::StatusCode;

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    /// The server is accepting requests.
    Healthy,
}

/// Handles health check requests and returns the current health status of the server.
pub(crate) async fn health() -> (StatusCode, Json<HealthState>) {
    (StatusCode::OK, Json(HealthState::Healthy))
}

/// Router serving the health endpoint. It is merged after the rate limit
/// layer is applied, so probes are never counted.
pub(crate) fn router(config: &HealthConfig) -> Router {
    Router::new().route(&config.path, get(health))
}
