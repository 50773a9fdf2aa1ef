//! ==============================================================================
//! api - http front end for the configuration store
//! ==============================================================================
//!
//! routes:
//!     GET    /api/config               whole configuration
//!     GET    /api/config/devices       device mapping
//!     GET    /api/config/device/:id    one device (404 if absent)
//!     POST   /api/config/device/:id    create or merge-update a device
//!     DELETE /api/config/device/:id    delete a device (404 if absent)
//!     GET    /api/config/mqtt          broker settings
//!     POST   /api/config/mqtt          merge-update broker settings
//!     POST   /api/config/reset         overwrite with built-in defaults
//!     GET    /health                   liveness check
//!
//! every read is one ConfigStore::load. every write is one
//! ConfigStore::load_for_update followed by one ConfigStore::save.
//! handlers hold no state of their own between requests.
//!
//! ==============================================================================

mod broker;
mod devices;
mod error;
mod health;
mod root;

pub use error::ApiError;

use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::store::ConfigStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
}

impl AppState {
    pub fn new(store: ConfigStore) -> Self {
        Self { store: Arc::new(store) }
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&ConfigStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ApiError::Internal(format!("store task failed: {}", e)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(root::get_config))
        .route("/api/config/devices", get(devices::list_devices))
        .route(
            "/api/config/device/:id",
            get(devices::get_device)
                .post(devices::upsert_device)
                .delete(devices::delete_device),
        )
        .route("/api/config/mqtt", get(broker::get_broker).post(broker::update_broker))
        .route("/api/config/reset", post(root::reset_config))
        .route("/health", get(health::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Unwrap a JSON body that must be an object.
fn object_body(body: Result<Json<Value>, JsonRejection>) -> Result<Map<String, Value>, ApiError> {
    match body {
        Ok(Json(Value::Object(fields))) => Ok(fields),
        Ok(Json(_)) => Err(ApiError::BadRequest("Request body must be a JSON object".to_string())),
        Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
    }
}
