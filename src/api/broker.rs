//! Broker endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::{object_body, ApiError, AppState};

/// GET /api/config/mqtt
pub async fn get_broker(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state.with_store(|store| store.load()).await?;
    Ok(Json(json!({
        "status": "success",
        "mqtt": config.mqtt,
    })))
}

/// POST /api/config/mqtt - field-level merge, not a replace
pub async fn update_broker(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let patch = object_body(body)?;

    let broker = state
        .with_store(move |store| {
            let mut config = store.load_for_update().map_err(ApiError::load_failed)?;
            config.mqtt = config
                .mqtt
                .merged(&patch)
                .map_err(|e| ApiError::BadRequest(format!("Invalid broker field: {}", e)))?;
            store.save(&config).map_err(ApiError::save_failed)?;
            Ok::<_, ApiError>(config.mqtt)
        })
        .await??;

    tracing::info!(broker = %broker.broker, port = broker.port, "broker config updated");
    Ok(Json(json!({
        "status": "success",
        "message": "MQTT config updated",
        "mqtt": broker,
    })))
}
