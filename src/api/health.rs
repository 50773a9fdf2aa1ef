//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::domain::timestamp_now;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    config_file: String,
    timestamp: String,
}

/// Static liveness info; never touches the configuration file.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "IoT Config Manager",
        version: env!("CARGO_PKG_VERSION"),
        config_file: state.store.path().display().to_string(),
        timestamp: timestamp_now(),
    })
}
