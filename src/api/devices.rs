//! Device endpoints.
//!
//! Updates are load, merge, save. The store lock covers the load and the
//! save separately, so two concurrent updates of one device can lose a
//! field: the later save carries the whole record it merged.
//! Writers refuse to run over a file that exists but cannot be parsed.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{object_body, ApiError, AppState};

/// GET /api/config/devices
pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state.with_store(|store| store.load()).await?;
    Ok(Json(json!({
        "status": "success",
        "devices": config.devices,
    })))
}

/// GET /api/config/device/:id
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let config = state.with_store(|store| store.load()).await?;
    let device = config
        .devices
        .get(&device_id)
        .ok_or_else(|| ApiError::DeviceNotFound(device_id.clone()))?;

    Ok(Json(json!({
        "status": "success",
        "device": device,
    })))
}

/// POST /api/config/device/:id
///
/// Creates the device if it does not exist. Only fields present in the
/// body are overwritten.
pub async fn upsert_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let patch = object_body(body)?;

    let id = device_id.clone();
    let device = state
        .with_store(move |store| {
            let mut config = store.load_for_update().map_err(ApiError::load_failed)?;
            let current = config.devices.get(&id).cloned().unwrap_or_default();
            let device = current
                .merged(&id, &patch)
                .map_err(|e| ApiError::BadRequest(format!("Invalid device field: {}", e)))?;

            config.devices.insert(id, device.clone());
            store.save(&config).map_err(ApiError::save_failed)?;
            Ok::<_, ApiError>(device)
        })
        .await??;

    tracing::info!(device = %device_id, uuid = %device.uuid, "device updated");
    Ok(Json(json!({
        "status": "success",
        "message": format!("Device '{}' updated", device_id),
        "device": device,
    })))
}

/// DELETE /api/config/device/:id
pub async fn delete_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = device_id.clone();
    state
        .with_store(move |store| -> Result<(), ApiError> {
            let mut config = store.load_for_update().map_err(ApiError::load_failed)?;
            if config.devices.remove(&id).is_none() {
                return Err(ApiError::DeviceNotFound(id));
            }
            store.save(&config).map_err(ApiError::save_failed)
        })
        .await??;

    tracing::info!(device = %device_id, "device deleted");
    Ok(Json(json!({
        "status": "success",
        "message": format!("Device '{}' deleted", device_id),
    })))
}
