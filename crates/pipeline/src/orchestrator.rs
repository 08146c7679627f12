//! Sequencing of merge → partition → archive for one upload.

use crate::archiver::Archiver;
use crate::chunk_store::ChunkStore;
use crate::error::{PipelineError, PipelineResult};
use crate::partitioner::Partitioner;
use crate::reassembler::{Reassembler, collect_merge};
use sieve_core::config::{AppConfig, PipelineConfig};
use sieve_core::{ArchiveName, MergeRequest, PipelineState, UploadId};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One processing request and where it has got to.
#[derive(Debug)]
pub struct PipelineRun {
    request: MergeRequest,
    state: PipelineState,
}

impl PipelineRun {
    pub fn new(request: MergeRequest) -> Self {
        Self {
            request,
            state: PipelineState::Received,
        }
    }

    pub fn request(&self) -> &MergeRequest {
        &self.request
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }
}

/// Wall-clock time spent in each step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub merge: Duration,
    pub partition: Duration,
    pub archive: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.merge + self.partition + self.archive
    }
}

/// Result of a successful run.
#[derive(Clone, Debug)]
pub struct ProcessedUpload {
    pub archive_name: ArchiveName,
    pub archive_path: PathBuf,
    pub merged_bytes: u64,
    pub positive_rows: u64,
    pub negative_rows: u64,
    pub timings: StageTimings,
}

/// Runs uploads through reassembly, partitioning and archiving.
pub struct Pipeline {
    chunk_store: Arc<ChunkStore>,
    reassembler: Reassembler,
    partitioner: Partitioner,
    archiver: Archiver,
    output_dir: PathBuf,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(chunk_store: Arc<ChunkStore>, config: &AppConfig) -> Self {
        Self {
            reassembler: Reassembler::new(chunk_store.clone(), &config.storage.merged_dir),
            partitioner: Partitioner::new(config.partition.clone()),
            archiver: Archiver::new(config.archive.compression_level),
            output_dir: config.storage.output_dir.clone(),
            config: config.pipeline.clone(),
            chunk_store,
        }
    }

    pub fn chunk_store(&self) -> &Arc<ChunkStore> {
        &self.chunk_store
    }

    /// Where the archive with this name lives once produced.
    pub fn archive_path(&self, name: &ArchiveName) -> PathBuf {
        self.output_dir.join(name.file_name())
    }

    /// Directory holding an upload's partition outputs.
    pub fn partition_dir(&self, upload_id: UploadId) -> PathBuf {
        self.output_dir.join(upload_id.to_string())
    }

    /// Drive `run` to `Done` or `Failed`.
    ///
    /// Any step error fails the run and is returned unchanged; nothing is
    /// retried. A failed run leaves its intermediate files in place.
    #[tracing::instrument(skip(self, run), fields(upload_id = %run.request.upload_id))]
    pub async fn execute(&self, run: &mut PipelineRun) -> PipelineResult<ProcessedUpload> {
        match self.drive(run).await {
            Ok(processed) => {
                tracing::info!(
                    archive = %processed.archive_name,
                    positive_rows = processed.positive_rows,
                    negative_rows = processed.negative_rows,
                    elapsed_ms = processed.timings.total().as_millis() as u64,
                    "Pipeline finished"
                );
                Ok(processed)
            }
            Err(e) => {
                let stage = run.state;
                run.state.fail();
                tracing::warn!(stage = %stage, error = %e, "Pipeline failed");
                Err(e)
            }
        }
    }

    async fn drive(&self, run: &mut PipelineRun) -> PipelineResult<ProcessedUpload> {
        let request = run.request.clone();
        let upload_id = request.upload_id;
        let mut timings = StageTimings::default();

        run.state.advance()?;
        let started = Instant::now();
        // Waiting for in-flight chunk writes counts against the merge limit.
        let merged = within(run.state, self.config.merge_timeout(), async {
            let claim = self.chunk_store.claim_merge(&request).await?;
            collect_merge(self.reassembler.merge(&claim, &request)).await
        })
        .await?;
        timings.merge = started.elapsed();

        run.state.advance()?;
        let started = Instant::now();
        let partition_dir = self.partition_dir(upload_id);
        let partition = within(
            run.state,
            self.config.partition_timeout(),
            self.partitioner.partition(&merged.path, &partition_dir),
        )
        .await?;
        timings.partition = started.elapsed();
        if !self.config.retain_intermediates {
            remove_quietly(&merged.path).await;
        }

        run.state.advance()?;
        let started = Instant::now();
        let archive_name = ArchiveName::for_upload(upload_id);
        let archive = within(
            run.state,
            self.config.archive_timeout(),
            self.archiver.archive(
                vec![partition.positive_path.clone(), partition.negative_path.clone()],
                self.archive_path(&archive_name),
            ),
        )
        .await?;
        timings.archive = started.elapsed();
        if !self.config.retain_intermediates {
            remove_quietly(&partition.positive_path).await;
            remove_quietly(&partition.negative_path).await;
            if let Err(e) = tokio::fs::remove_dir(&partition_dir).await {
                tracing::warn!(
                    path = %partition_dir.display(),
                    error = %e,
                    "Failed to remove partition directory"
                );
            }
        }

        run.state.advance()?;
        Ok(ProcessedUpload {
            archive_name,
            archive_path: archive.path,
            merged_bytes: merged.bytes,
            positive_rows: partition.positive_rows,
            negative_rows: partition.negative_rows,
            timings,
        })
    }
}

/// Bound one step by `limit`.
async fn within<T>(
    stage: PipelineState,
    limit: Duration,
    step: impl Future<Output = PipelineResult<T>>,
) -> PipelineResult<T> {
    match tokio::time::timeout(limit, step).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            stage,
            seconds: limit.as_secs(),
        }),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove intermediate file");
    }
}
