//! JSON error responses for the administrative API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::StoreError;

// ---

/// Error returned by route handlers.
///
/// Not-found is a normal negative answer; store trouble becomes 503 so
/// callers can retry.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let ApiError::Store(err) = &self;
        let (status, code) = match err {
            StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                tracing::error!("Store unavailable: {}", err);
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            StoreError::DuplicateActive { .. } => (StatusCode::CONFLICT, "CONFLICT"),
            StoreError::Corrupt(_) => {
                tracing::error!("Corrupt record: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let message = match err {
            StoreError::NotFound { .. } | StoreError::DuplicateActive { .. } => err.to_string(),
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                "Service temporarily unavailable".to_string()
            }
            StoreError::Corrupt(_) => "An internal error occurred".to_string(),
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
