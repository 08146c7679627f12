//! Core domain types and shared logic for the sieve CSV splitting service.
//!
//! This crate defines the data model used across all other crates:
//! - Upload identifiers and chunk metadata
//! - Validated chunk submissions and merge requests
//! - Pipeline states for one processing run
//! - Archive naming
//! - Application configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod upload;

pub use chunk::{ChunkIndex, ChunkSubmission, RawChunkMetadata};
pub use error::{Error, Result};
pub use pipeline::PipelineState;
pub use upload::{ArchiveName, FileName, MergeRequest, RawMergeRequest, UploadId};

/// Default chunk size used by clients: 2 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Maximum chunk size accepted by the server: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Upper bound on the number of chunks in one upload.
pub const MAX_TOTAL_CHUNKS: u32 = 1_000_000;
