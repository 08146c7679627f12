//! Command-line client for the sieve server.

mod api_client;

use anyhow::{Context, Result};
use api_client::{ApiClient, ChunkUpload, ProcessRequest};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "sievectl")]
#[command(about = "Upload CSV files to a sieve server and fetch the partitioned archive")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server base URL
    #[arg(long, env = "SIEVE_SERVER", default_value = "http://127.0.0.1:5000")]
    server: String,
}

impl ApiArgs {
    fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.server)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a CSV file, process it and download the archive
    Upload {
        /// CSV file to upload
        file: PathBuf,

        /// Chunk size in bytes (default: server's recommended size)
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Maximum number of chunks in flight after the first
        #[arg(long)]
        parallel: Option<usize>,

        /// Where to write the archive (default: ./<archive name>)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Stop after processing and print the archive name
        #[arg(long)]
        no_download: bool,

        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show which chunks of an upload the server holds
    Status {
        upload_id: String,

        #[command(flatten)]
        api: ApiArgs,
    },
    /// Process an upload whose chunks are already stored
    Process {
        upload_id: String,

        /// Original file name, must end in .csv
        #[arg(long)]
        file_name: String,

        #[arg(long)]
        total_chunks: u32,

        #[command(flatten)]
        api: ApiArgs,
    },
    /// Download a finished archive
    Download {
        archive_name: String,

        #[arg(long, short)]
        output: Option<PathBuf>,

        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Upload {
            file,
            chunk_size,
            parallel,
            output,
            no_download,
            api,
        } => {
            let client = api.client()?;
            run_upload(&client, &file, chunk_size, parallel, output, no_download).await
        }
        Commands::Status { upload_id, api } => {
            let status = api.client()?.upload_status(&upload_id).await?;
            println!("Upload:   {}", status.upload_id);
            match status.total_chunks {
                Some(total) => {
                    println!("Received: {}/{}", status.received_chunks.len(), total)
                }
                None => println!("Received: {} (total unknown)", status.received_chunks.len()),
            }
            let missing = status.missing_chunks();
            if !missing.is_empty() {
                println!("Missing:  {}", format_indices(&missing));
            }
            if status.merging {
                println!("Merging:  yes");
            }
            Ok(())
        }
        Commands::Process {
            upload_id,
            file_name,
            total_chunks,
            api,
        } => {
            let processed = api
                .client()?
                .process(&ProcessRequest {
                    file_name,
                    total_chunks,
                    upload_id,
                })
                .await?;
            println!("Archive: {}", processed.archive_name);
            println!(
                "Rows:    {} positive, {} negative",
                processed.positive_rows, processed.negative_rows
            );
            Ok(())
        }
        Commands::Download {
            archive_name,
            output,
            api,
        } => {
            let dest = output.unwrap_or_else(|| PathBuf::from(&archive_name));
            let bytes = api.client()?.download(&archive_name, &dest).await?;
            println!("Saved {} ({bytes} bytes)", dest.display());
            Ok(())
        }
        Commands::Health { api } => {
            let health = api.client()?.health().await?;
            println!("Status:  {}", health.status);
            println!("Version: {}", health.version);
            Ok(())
        }
    }
}

async fn run_upload(
    client: &ApiClient,
    file: &Path,
    chunk_size: Option<u64>,
    parallel: Option<usize>,
    output: Option<PathBuf>,
    no_download: bool,
) -> Result<()> {
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .context("file name is not valid UTF-8")?
        .to_string();
    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?
        .len();

    let caps = client
        .capabilities()
        .await
        .context("failed to fetch server capabilities")?;
    let chunk_size = effective_chunk_size(chunk_size, caps.default_chunk_size, caps.max_chunk_size)?;
    let parallel = parallel.unwrap_or(caps.recommended_parallelism as usize).max(1);
    let total_chunks = chunk_count(size, chunk_size)?;

    println!("Uploading {file_name} ({size} bytes) in {total_chunks} chunk(s) of {chunk_size} bytes");
    let started = Instant::now();

    let mut reader = tokio::fs::File::open(file).await?;
    let first = read_chunk(&mut reader, chunk_size, size).await?;
    let upload_id = client
        .upload_chunk(&ChunkUpload {
            upload_id: None,
            chunk_number: 0,
            total_chunks,
            file_name: file_name.clone(),
            data: first,
        })
        .await
        .context("failed to upload chunk 0")?
        .upload_id;
    println!("  Upload id: {upload_id}");

    upload_remaining_chunks(
        client,
        &mut reader,
        &upload_id,
        &file_name,
        size,
        chunk_size,
        total_chunks,
        parallel,
    )
    .await?;
    println!(
        "  Uploaded {total_chunks} chunk(s) in {:.1}s",
        started.elapsed().as_secs_f64()
    );

    let processed = client
        .process(&ProcessRequest {
            file_name,
            total_chunks,
            upload_id: upload_id.clone(),
        })
        .await
        .context("processing failed")?;
    println!(
        "  Processed: {} positive, {} negative row(s)",
        processed.positive_rows, processed.negative_rows
    );

    if no_download {
        println!("Archive: {}", processed.archive_name);
        return Ok(());
    }

    let dest = output.unwrap_or_else(|| PathBuf::from(&processed.archive_name));
    let bytes = client.download(&processed.archive_name, &dest).await?;
    println!("Saved {} ({bytes} bytes)", dest.display());
    Ok(())
}

/// Upload chunks `1..total_chunks`, keeping at most `parallel` in flight.
#[allow(clippy::too_many_arguments)]
async fn upload_remaining_chunks(
    client: &ApiClient,
    reader: &mut tokio::fs::File,
    upload_id: &str,
    file_name: &str,
    size: u64,
    chunk_size: u64,
    total_chunks: u32,
    parallel: usize,
) -> Result<()> {
    let mut in_flight = FuturesUnordered::new();

    for chunk_number in 1..total_chunks {
        let remaining = size - u64::from(chunk_number) * chunk_size;
        let data = read_chunk(reader, chunk_size, remaining).await?;
        let chunk = ChunkUpload {
            upload_id: Some(upload_id.to_string()),
            chunk_number,
            total_chunks,
            file_name: file_name.to_string(),
            data,
        };
        let client = client.clone();

        in_flight.push(async move {
            client
                .upload_chunk(&chunk)
                .await
                .with_context(|| format!("failed to upload chunk {}", chunk.chunk_number))
        });

        if in_flight.len() >= parallel
            && let Some(result) = in_flight.next().await
        {
            result?;
        }
    }

    while let Some(result) = in_flight.next().await {
        result?;
    }

    Ok(())
}

async fn read_chunk(reader: &mut tokio::fs::File, chunk_size: u64, remaining: u64) -> Result<Bytes> {
    let len = usize::try_from(chunk_size.min(remaining))
        .map_err(|_| anyhow::anyhow!("chunk size exceeds platform limits"))?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Bytes::from(data))
}

/// Pick the chunk size: the requested one, else the server default, capped
/// by the server maximum.
fn effective_chunk_size(requested: Option<u64>, default: u64, max: u64) -> Result<u64> {
    let size = requested.unwrap_or(default).min(max);
    if size == 0 {
        anyhow::bail!("chunk size must be positive");
    }
    Ok(size)
}

/// Number of chunks for a file. An empty file is still sent as one chunk.
fn chunk_count(size: u64, chunk_size: u64) -> Result<u32> {
    let count = size.div_ceil(chunk_size).max(1);
    u32::try_from(count).map_err(|_| anyhow::anyhow!("file needs too many chunks ({count})"))
}

/// Render indices compactly, collapsing runs: `0-3, 7, 9-10`.
fn format_indices(indices: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut iter = indices.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        let mib = 1024 * 1024;
        assert_eq!(chunk_count(5 * mib, 2 * mib).unwrap(), 3);
        assert_eq!(chunk_count(4 * mib, 2 * mib).unwrap(), 2);
        assert_eq!(chunk_count(1, 2 * mib).unwrap(), 1);
        assert_eq!(chunk_count(0, 2 * mib).unwrap(), 1);
        assert!(chunk_count(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_effective_chunk_size() {
        assert_eq!(effective_chunk_size(None, 100, 1000).unwrap(), 100);
        assert_eq!(effective_chunk_size(Some(500), 100, 1000).unwrap(), 500);
        assert_eq!(effective_chunk_size(Some(5000), 100, 1000).unwrap(), 1000);
        assert!(effective_chunk_size(Some(0), 100, 1000).is_err());
    }

    #[test]
    fn test_format_indices() {
        assert_eq!(format_indices(&[]), "");
        assert_eq!(format_indices(&[4]), "4");
        assert_eq!(format_indices(&[0, 1, 2, 3, 7, 9, 10]), "0-3, 7, 9-10");
    }

    #[tokio::test]
    async fn test_read_chunk_short_tail() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        let mut file = tokio::fs::File::create(&path).await.unwrap();
        file.write_all(b"0123456789").await.unwrap();
        file.flush().await.unwrap();

        let mut reader = tokio::fs::File::open(&path).await.unwrap();
        assert_eq!(&read_chunk(&mut reader, 4, 10).await.unwrap()[..], b"0123");
        assert_eq!(&read_chunk(&mut reader, 4, 6).await.unwrap()[..], b"4567");
        assert_eq!(&read_chunk(&mut reader, 4, 2).await.unwrap()[..], b"89");
    }
}
