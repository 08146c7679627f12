//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload ID: {0}")]
    InvalidUploadId(String),

    #[error("invalid chunk metadata: {0}")]
    InvalidChunkMetadata(String),

    #[error("invalid merge request: {0}")]
    InvalidMergeRequest(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("invalid archive name: {0}")]
    InvalidArchiveName(String),

    #[error("invalid pipeline transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::PipelineState,
        to: crate::PipelineState,
    },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
