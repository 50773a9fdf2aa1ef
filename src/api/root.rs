//! Whole-configuration endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::domain::timestamp_now;

/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state.with_store(|store| store.load()).await?;
    Ok(Json(json!({
        "status": "success",
        "data": config,
        "timestamp": timestamp_now(),
    })))
}

/// POST /api/config/reset
pub async fn reset_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state
        .with_store(|store| store.reset())
        .await?
        .map_err(ApiError::reset_failed)?;

    tracing::warn!("config reset to defaults");
    Ok(Json(json!({
        "status": "success",
        "message": "Config reset to default",
        "data": config,
    })))
}
