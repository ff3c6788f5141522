//! API error types.

use crate::ingest::IngestError;
use crate::stager::StageError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use logward_core::{DecompressError, SummaryId};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Upload that blocked this one, for `duplicate_pending`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_tracking_id: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("encounter already uploaded as {existing_tracking_id}")]
    DuplicatePending { existing_tracking_id: SummaryId },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("metadata error: {0}")]
    Metadata(#[from] logward_metadata::MetadataError),

    #[error("{0}")]
    Core(#[from] logward_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::DuplicatePending { .. } => "duplicate_pending",
            Self::Internal(_) => "internal_error",
            Self::Ingest(e) => e.code(),
            Self::Metadata(logward_metadata::MetadataError::NotFound(_)) => "not_found",
            Self::Metadata(_) => "metadata_error",
            Self::Core(e) => e.code(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::DuplicatePending { .. } => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ingest(e) => match e {
                IngestError::AdmissionDenied => StatusCode::TOO_MANY_REQUESTS,
                IngestError::Decompress(DecompressError::SizeExceededMax { .. }) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                IngestError::Decompress(_) => StatusCode::BAD_REQUEST,
                IngestError::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
                IngestError::Stage(
                    StageError::StoreUnavailable(_) | StageError::QueueUnavailable,
                ) => StatusCode::SERVICE_UNAVAILABLE,
                IngestError::Stage(StageError::StoreWriteFailed(_)) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Metadata(e) => match e {
                logward_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let existing_tracking_id = match &self {
            Self::DuplicatePending {
                existing_tracking_id,
            } => Some(existing_tracking_id.to_string()),
            _ => None,
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            existing_tracking_id,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
