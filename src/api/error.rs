//! API error types and response formatting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::store::StoreError;

/// Errors a request can end in. Each one is terminal for that request only.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Requested device is not in the configuration.
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    /// Body is not a JSON object or a field has the wrong type.
    #[error("{0}")]
    BadRequest(String),

    /// The configuration file could not be read for an update, or written.
    #[error("{context}")]
    Persistence {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    /// Blocking store task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn load_failed(source: StoreError) -> Self {
        Self::Persistence { context: "Failed to load config", source }
    }

    pub fn save_failed(source: StoreError) -> Self {
        Self::Persistence { context: "Failed to save config", source }
    }

    pub fn reset_failed(source: StoreError) -> Self {
        Self::Persistence { context: "Failed to reset config", source }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Persistence { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Persistence { source, .. } => {
                tracing::error!(error = %source, "persistence failure");
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
            }
            _ => {}
        }

        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
