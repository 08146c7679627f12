//! API error types.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sieve_pipeline::PipelineError;
use sieve_storage::StorageError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Core(#[from] sieve_core::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Internal(_) => "internal_error",
            Self::Multipart(_) => "invalid_multipart",
            Self::Core(e) => core_code(e),
            Self::Storage(StorageError::NotFound(_)) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Pipeline(e) => match e {
                PipelineError::InvalidInput(e) => core_code(e),
                PipelineError::UploadMismatch { .. } => "upload_mismatch",
                PipelineError::MergeInProgress(_) => "merge_in_progress",
                PipelineError::UnknownUpload(_) => "not_found",
                PipelineError::MissingChunk { .. } => "missing_chunk",
                PipelineError::Timeout { .. } => "timeout",
                PipelineError::Storage(StorageError::NotFound(_)) => "not_found",
                _ => "processing_failed",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Multipart(e) => e.status(),
            Self::Core(e) => core_status(e),
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Pipeline(e) => match e {
                PipelineError::InvalidInput(e) => core_status(e),
                PipelineError::UploadMismatch { .. } | PipelineError::MergeInProgress(_) => {
                    StatusCode::CONFLICT
                }
                PipelineError::UnknownUpload(_) => StatusCode::NOT_FOUND,
                PipelineError::MissingChunk { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::Storage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

fn core_code(e: &sieve_core::Error) -> &'static str {
    match e {
        sieve_core::Error::UnsupportedMediaType(_) => "unsupported_media_type",
        sieve_core::Error::InvalidTransition { .. } => "internal_error",
        _ => "bad_request",
    }
}

fn core_status(e: &sieve_core::Error) -> StatusCode {
    match e {
        sieve_core::Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        sieve_core::Error::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::{ChunkIndex, PipelineState, UploadId};

    #[test]
    fn test_client_errors_map_to_4xx() {
        let err = ApiError::from(sieve_core::Error::InvalidChunkMetadata("x".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(sieve_core::Error::UnsupportedMediaType("a.txt".into()));
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(err.code(), "unsupported_media_type");

        let wrapped = ApiError::from(PipelineError::InvalidInput(
            sieve_core::Error::InvalidUploadId("nope".into()),
        ));
        assert_eq!(wrapped.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_pipeline_errors_are_distinguished() {
        let id = UploadId::new();
        let cases = [
            (
                PipelineError::MissingChunk {
                    upload_id: id,
                    index: ChunkIndex::new(4),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing_chunk",
            ),
            (
                PipelineError::MergeInProgress(id),
                StatusCode::CONFLICT,
                "merge_in_progress",
            ),
            (
                PipelineError::UnknownUpload(id),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                PipelineError::Timeout {
                    stage: PipelineState::Archiving,
                    seconds: 3,
                },
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
            ),
            (
                PipelineError::Io(std::io::Error::other("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "processing_failed",
            ),
        ];
        for (err, status, code) in cases {
            let err = ApiError::from(err);
            assert_eq!(err.status_code(), status, "{err}");
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn test_missing_chunk_message_names_index() {
        let err = ApiError::from(PipelineError::MissingChunk {
            upload_id: UploadId::new(),
            index: ChunkIndex::new(4),
        });
        assert!(err.to_string().contains("chunk 4"), "{err}");
    }
}
