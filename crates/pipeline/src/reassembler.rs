//! Reassembly of stored chunks into the original file.

use crate::chunk_store::{ChunkStore, MergeClaim};
use crate::error::{PipelineError, PipelineResult};
use futures::{Stream, StreamExt};
use sieve_core::{ChunkIndex, FileName, MergeRequest, UploadId};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

/// Write buffer for the merged file (1 MiB).
const WRITE_BUFFER: usize = 1024 * 1024;

/// Notifications produced while merging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeEvent {
    /// `merged` of `total` chunks have been appended.
    Progress { merged: u32, total: u32 },
    /// The merged file is in place. Always the last event.
    Complete { path: PathBuf, bytes: u64 },
}

/// A merge in progress. Ends after `Complete` or the first error.
pub type MergeStream<'a> = Pin<Box<dyn Stream<Item = PipelineResult<MergeEvent>> + Send + 'a>>;

/// The file produced by a finished merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Removes a file on drop unless told to keep it.
struct PendingFile {
    path: PathBuf,
    armed: bool,
}

impl PendingFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Concatenates an upload's chunks, in index order, into one file.
pub struct Reassembler {
    store: Arc<ChunkStore>,
    merged_dir: PathBuf,
}

impl Reassembler {
    pub fn new(store: Arc<ChunkStore>, merged_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            merged_dir: merged_dir.into(),
        }
    }

    /// Where the merged file for an upload is written.
    pub fn destination(&self, upload_id: UploadId, file_name: &FileName) -> PathBuf {
        self.merged_dir.join(format!("{upload_id}_{file_name}"))
    }

    /// Merge a claimed upload.
    ///
    /// Every index is checked before anything is consumed, so a merge that
    /// fails on a missing chunk leaves the stored chunks untouched. Once
    /// appending starts, each chunk is deleted right after it is written.
    /// The output is assembled in a temporary sibling and only renamed into
    /// place after the last chunk, so a failed or dropped merge never
    /// leaves a merged file behind.
    pub fn merge<'a>(&'a self, claim: &'a MergeClaim, request: &'a MergeRequest) -> MergeStream<'a> {
        let stream = async_stream::try_stream! {
            let upload_id = claim.upload_id();
            if request.upload_id != upload_id {
                Err(PipelineError::UploadMismatch {
                    upload_id: request.upload_id,
                    message: format!("merge claim belongs to upload {upload_id}"),
                })?;
            }
            let total = claim.total_chunks();

            let present = self.store.stored_indices(upload_id).await?;
            if let Some(missing) = first_missing(&present, total) {
                Err(PipelineError::MissingChunk {
                    upload_id,
                    index: ChunkIndex::new(missing),
                })?;
            }

            fs::create_dir_all(&self.merged_dir).await?;
            let destination = self.destination(upload_id, claim.file_name());
            let pending = PendingFile::new(temp_sibling(&destination));
            let file = fs::File::create(&pending.path).await?;
            let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
            let mut bytes = 0u64;

            for i in 0..total {
                let index = ChunkIndex::new(i);
                let mut chunk = self.store.open_chunk(claim, index).await?;
                while let Some(piece) = chunk.next().await {
                    let piece = piece?;
                    writer.write_all(&piece).await?;
                    bytes += piece.len() as u64;
                }
                drop(chunk);
                self.store.remove_chunk(claim, index).await?;
                yield MergeEvent::Progress { merged: i + 1, total };
            }

            writer.flush().await?;
            let file = writer.into_inner();
            file.sync_all().await?;
            drop(file);
            fs::rename(&pending.path, &destination).await?;
            pending.keep();

            tracing::info!(upload_id = %upload_id, bytes, chunks = total, "Merged upload");
            yield MergeEvent::Complete { path: destination, bytes };
        };
        Box::pin(stream)
    }
}

/// Drain a merge, returning the file it produced.
pub async fn collect_merge(mut stream: MergeStream<'_>) -> PipelineResult<MergedFile> {
    while let Some(event) = stream.next().await {
        match event? {
            MergeEvent::Progress { merged, total } => {
                tracing::debug!(merged, total, "Merge progress");
            }
            MergeEvent::Complete { path, bytes } => return Ok(MergedFile { path, bytes }),
        }
    }
    Err(PipelineError::Incomplete)
}

/// Lowest index in `0..total` absent from the sorted `present` list.
fn first_missing(present: &[u32], total: u32) -> Option<u32> {
    (0..total).find(|i| present.binary_search(i).is_err())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp.{}", Uuid::new_v4()))
}
