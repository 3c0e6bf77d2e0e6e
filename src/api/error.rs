use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::models::ErrorResponse;
use super::validation::RequestValidationError;
use crate::ledger::LedgerError;
use crate::scheduler::{ClockError, SyncError};
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("validation failed: {0}")]
    Validation(#[from] RequestValidationError),
    #[error("payload too large: limit is {0} bytes")]
    PayloadTooLarge(usize),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("storage busy, retry later")]
    Unavailable,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Log the fault and hide its details from the caller
    pub fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "Internal error while handling request");
        ApiError::Internal
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unavailable => "STORAGE_BUSY",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Busy { .. } => ApiError::Unavailable,
            StorageError::Ledger(LedgerError::BufferNotFound(id)) => {
                ApiError::Validation(RequestValidationError::UnknownBufferConfig(id))
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::NotFound(id) => ApiError::NotFound(format!("schedule {id}")),
            SyncError::Storage(err) => err.into(),
            SyncError::Clock(ClockError::InvalidExpression(err)) => {
                ApiError::Validation(RequestValidationError::InvalidCron(err.to_string()))
            }
            other => ApiError::internal(other),
        }
    }
}
