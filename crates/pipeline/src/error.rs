//! Pipeline error types.

use sieve_core::{ChunkIndex, PipelineState, UploadId};
use sieve_storage::StorageError;
use thiserror::Error;

/// Errors raised while storing chunks or processing an upload.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed caller input, rejected before any side effect.
    #[error(transparent)]
    InvalidInput(#[from] sieve_core::Error),

    /// A chunk disagrees with what earlier chunks of its upload declared.
    #[error("upload {upload_id}: {message}")]
    UploadMismatch { upload_id: UploadId, message: String },

    /// The upload is being merged; it accepts no chunks and no second merge.
    #[error("upload {0} is already being merged")]
    MergeInProgress(UploadId),

    /// Nothing is known about the upload.
    #[error("upload {0} not found")]
    UnknownUpload(UploadId),

    /// A chunk in the expected range is absent.
    #[error("chunk {index} of upload {upload_id} is missing")]
    MissingChunk {
        upload_id: UploadId,
        index: ChunkIndex,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{stage} step timed out after {seconds}s")]
    Timeout { stage: PipelineState, seconds: u64 },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("merge finished without producing a file")]
    Incomplete,
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl From<tempfile::PersistError> for PipelineError {
    fn from(e: tempfile::PersistError) -> Self {
        Self::Io(e.error)
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
