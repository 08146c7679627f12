//! Upload processing for sieve.
//!
//! Chunks land in the [`ChunkStore`]; a processing request then runs them
//! through the [`Reassembler`], the [`Partitioner`] and the [`Archiver`],
//! sequenced by the [`Pipeline`].

pub mod archiver;
pub mod chunk_store;
pub mod error;
pub mod orchestrator;
pub mod partitioner;
pub mod reassembler;

pub use archiver::{ArchiveOutcome, Archiver};
pub use chunk_store::{ChunkStore, MergeClaim, SavedChunk, UploadStatus};
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{Pipeline, PipelineRun, ProcessedUpload, StageTimings};
pub use partitioner::{PartitionOutcome, Partitioner};
pub use reassembler::{MergeEvent, MergeStream, MergedFile, Reassembler, collect_merge};
