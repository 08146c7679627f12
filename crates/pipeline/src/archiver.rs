//! Zip packaging of partition outputs.

use crate::error::{PipelineError, PipelineResult};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Entries at or above this size need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// A finished archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Writes deflated zip archives.
#[derive(Clone, Copy, Debug)]
pub struct Archiver {
    compression_level: i64,
}

impl Archiver {
    pub fn new(compression_level: i64) -> Self {
        Self { compression_level }
    }

    /// Package `entries` into an archive at `destination`.
    ///
    /// Each entry is stored under its file name. The archive is built in a
    /// temp file next to `destination` on the blocking pool and only moved
    /// there after the zip directory has been written. The move happens on
    /// the calling task, so dropping this future before it completes leaves
    /// `destination` untouched even if the blocking build runs on.
    pub async fn archive(
        &self,
        entries: Vec<PathBuf>,
        destination: PathBuf,
    ) -> PipelineResult<ArchiveOutcome> {
        let level = self.compression_level;
        let parent = destination
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                PipelineError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("archive path has no parent: {}", destination.display()),
                ))
            })?;
        let built =
            tokio::task::spawn_blocking(move || build_archive(level, &entries, &parent)).await??;
        built.persist(destination)
    }
}

/// A complete archive still in its temp file.
#[derive(Debug)]
struct BuiltArchive {
    temp: NamedTempFile,
    names: Vec<String>,
    bytes: u64,
}

impl BuiltArchive {
    fn persist(self, destination: PathBuf) -> PipelineResult<ArchiveOutcome> {
        self.temp.persist(&destination)?;
        tracing::info!(
            archive = %destination.display(),
            entries = ?self.names,
            bytes = self.bytes,
            "Archive written"
        );
        Ok(ArchiveOutcome {
            path: destination,
            bytes: self.bytes,
        })
    }
}

fn entry_name(path: &Path) -> PipelineResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("archive entry has no usable file name: {}", path.display()),
            ))
        })
}

fn build_archive(level: i64, entries: &[PathBuf], parent: &Path) -> PipelineResult<BuiltArchive> {
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(temp));
    let base = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level));

    let mut names = Vec::with_capacity(entries.len());
    for path in entries {
        let name = entry_name(path)?;
        if names.contains(&name) {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("duplicate archive entry: {name}"),
            )));
        }

        let file = File::open(path)?;
        let size = file.metadata()?.len();
        zip.start_file(name.clone(), base.large_file(size >= ZIP64_THRESHOLD))?;
        std::io::copy(&mut BufReader::new(file), &mut zip)?;
        names.push(name);
    }

    let temp = zip.finish()?.into_inner().map_err(|e| e.into_error())?;
    temp.as_file().sync_all()?;
    let bytes = temp.as_file().metadata()?.len();
    Ok(BuiltArchive { temp, names, bytes })
}
