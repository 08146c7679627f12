//! Row partitioning of a merged CSV file into two outputs.
//!
//! Rows are streamed from the source and routed by one column: a value equal
//! (ASCII case-insensitively) to the configured positive literal goes to the
//! positive output, everything else, including a missing value or a missing
//! column, goes to the negative output. Each branch buffers at most
//! `batch_size` rows before flushing.
//!
//! Rows are written back as their raw field values joined by commas. Fields
//! containing commas, quotes or newlines are not re-quoted, so such input
//! does not survive partitioning intact.

use crate::error::PipelineResult;
use csv::ByteRecord;
use sieve_core::config::PartitionConfig;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// I/O buffer size for the source reader and both writers (1 MiB).
const IO_BUFFER: usize = 1024 * 1024;

/// The two files produced by a partition run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub positive_path: PathBuf,
    pub negative_path: PathBuf,
    pub positive_rows: u64,
    pub negative_rows: u64,
}

impl PartitionOutcome {
    /// Data rows read from the source.
    pub fn total_rows(&self) -> u64 {
        self.positive_rows + self.negative_rows
    }
}

/// Splits CSV files by a column predicate.
#[derive(Clone, Debug)]
pub struct Partitioner {
    config: PartitionConfig,
}

impl Partitioner {
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Partition `source` into the configured file names under `output_dir`.
    ///
    /// Runs on the blocking pool. Each output is written to a temp file and
    /// moved into place on the calling task once the source is exhausted, so
    /// dropping this future early publishes nothing. A source without a
    /// header row yields two empty files.
    pub async fn partition(
        &self,
        source: &Path,
        output_dir: &Path,
    ) -> PipelineResult<PartitionOutcome> {
        tokio::fs::create_dir_all(output_dir).await?;

        let config = self.config.clone();
        let source = source.to_owned();
        let output_dir = output_dir.to_owned();
        let split =
            tokio::task::spawn_blocking(move || partition_blocking(&config, &source, &output_dir))
                .await??;
        split.persist()
    }
}

/// One output file, filled in bounded batches.
struct BranchWriter {
    file: BufWriter<NamedTempFile>,
    final_path: PathBuf,
    pending: Vec<u8>,
    pending_rows: usize,
    batch_size: usize,
    rows: u64,
}

impl BranchWriter {
    fn new(output_dir: &Path, file_name: &str, batch_size: usize) -> PipelineResult<Self> {
        let temp = NamedTempFile::new_in(output_dir)?;
        Ok(Self {
            file: BufWriter::with_capacity(IO_BUFFER, temp),
            final_path: output_dir.join(file_name),
            pending: Vec::new(),
            pending_rows: 0,
            batch_size,
            rows: 0,
        })
    }

    fn write_header(&mut self, header: &ByteRecord) -> PipelineResult<()> {
        join_into(header, &mut self.pending);
        self.flush_batch()
    }

    fn push_row(&mut self, record: &ByteRecord) -> PipelineResult<()> {
        join_into(record, &mut self.pending);
        self.pending_rows += 1;
        self.rows += 1;
        if self.pending_rows >= self.batch_size {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn flush_batch(&mut self) -> PipelineResult<()> {
        self.file.write_all(&self.pending)?;
        self.pending.clear();
        self.pending_rows = 0;
        Ok(())
    }

    /// Flush and sync; the output stays in its temp file.
    fn finish(mut self) -> PipelineResult<FinishedBranch> {
        self.flush_batch()?;
        let temp = self.file.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        Ok(FinishedBranch {
            temp,
            final_path: self.final_path,
            rows: self.rows,
        })
    }
}

#[derive(Debug)]
struct FinishedBranch {
    temp: NamedTempFile,
    final_path: PathBuf,
    rows: u64,
}

/// Both outputs written and synced but not yet at their final paths.
#[derive(Debug)]
struct SplitOutputs {
    positive: FinishedBranch,
    negative: FinishedBranch,
}

impl SplitOutputs {
    fn persist(self) -> PipelineResult<PartitionOutcome> {
        let Self { positive, negative } = self;
        positive.temp.persist(&positive.final_path)?;
        negative.temp.persist(&negative.final_path)?;
        Ok(PartitionOutcome {
            positive_path: positive.final_path,
            negative_path: negative.final_path,
            positive_rows: positive.rows,
            negative_rows: negative.rows,
        })
    }
}

/// Append `record` as comma-joined fields plus a newline.
fn join_into(record: &ByteRecord, out: &mut Vec<u8>) {
    for (i, field) in record.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(field);
    }
    out.push(b'\n');
}

fn partition_blocking(
    config: &PartitionConfig,
    source: &Path,
    output_dir: &Path,
) -> PipelineResult<SplitOutputs> {
    let file = File::open(source)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .buffer_capacity(IO_BUFFER)
        .from_reader(BufReader::with_capacity(IO_BUFFER, file));

    let mut positive = BranchWriter::new(output_dir, &config.positive_file_name, config.batch_size)?;
    let mut negative = BranchWriter::new(output_dir, &config.negative_file_name, config.batch_size)?;

    let mut record = ByteRecord::new();
    if reader.read_byte_record(&mut record)? {
        let column = record.iter().position(|h| h == config.column.as_bytes());
        if column.is_none() {
            tracing::warn!(
                column = %config.column,
                "Partition column not in header; every row goes to the negative output"
            );
        }
        positive.write_header(&record)?;
        negative.write_header(&record)?;

        let literal = config.positive_value.as_bytes();
        while reader.read_byte_record(&mut record)? {
            let is_positive = column
                .and_then(|i| record.get(i))
                .is_some_and(|value| value.eq_ignore_ascii_case(literal));
            if is_positive {
                positive.push_row(&record)?;
            } else {
                negative.push_row(&record)?;
            }
        }
    }

    let positive = positive.finish()?;
    let negative = negative.finish()?;

    tracing::info!(
        source = %source.display(),
        positive_rows = positive.rows,
        negative_rows = negative.rows,
        "Partitioned file"
    );
    Ok(SplitOutputs { positive, negative })
}
