use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Attempts after the first one for idempotent requests.
const MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    retry_base_delay: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    /// Use a different first retry delay; later retries double it.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    /// Send a request built by `make_request`, retrying transport errors and
    /// 5xx responses with exponential backoff.
    async fn send_with_retry<F>(&self, mut make_request: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let delay = self.retry_base_delay * (1 << attempt.min(16));
            match make_request().send().await {
                Ok(response) if response.status().is_server_error() && attempt < MAX_RETRIES => {
                    eprintln!(
                        "  Server error ({}), retrying in {:.1}s...",
                        response.status(),
                        delay.as_secs_f64()
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if attempt < MAX_RETRIES => {
                    eprintln!(
                        "  Request error ({e}), retrying in {:.1}s...",
                        delay.as_secs_f64()
                    );
                }
                Err(e) => return Err(e.into()),
            }
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        serde_json::from_str(&body).with_context(|| format!("unexpected response body: {body}"))
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/health")?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        Self::read_json(response).await
    }

    pub async fn capabilities(&self) -> Result<CapabilitiesResponse> {
        let url = self.url("/api/files/capabilities")?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        Self::read_json(response).await
    }

    /// Upload one chunk. Re-sending a chunk overwrites it, so this retries.
    pub async fn upload_chunk(&self, chunk: &ChunkUpload) -> Result<ChunkUploadResponse> {
        let url = self.url("/api/files/chunks")?;
        let response = self
            .send_with_retry(|| self.http.post(url.clone()).multipart(chunk.form()))
            .await?;
        Self::read_json(response).await
    }

    pub async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse> {
        let url = self.url(&format!("/api/files/uploads/{upload_id}"))?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        Self::read_json(response).await
    }

    /// Trigger processing. Not retried: a run consumes the stored chunks.
    pub async fn process(&self, req: &ProcessRequest) -> Result<ProcessResponse> {
        let url = self.url("/api/files/process")?;
        let response = self.http.post(url).json(req).send().await?;
        Self::read_json(response).await
    }

    /// Stream an archive into `dest`, returning the bytes written.
    ///
    /// Data goes to a `.part` sibling first and is renamed once complete.
    pub async fn download(&self, archive_name: &str, dest: &Path) -> Result<u64> {
        let url = self.url(&format!("/api/files/download/{archive_name}"))?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("failed to create {}", partial.display()))?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece.context("download interrupted")?;
            file.write_all(&piece).await?;
            written += piece.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .with_context(|| format!("failed to move download to {}", dest.display()))?;
        Ok(written)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Turn an error response into a readable error, using the server's
/// `{code, message}` body when present.
fn api_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => anyhow::anyhow!("API error ({status}) {}: {}", err.code, err.message),
        Err(_) => anyhow::anyhow!("API error ({status}): {body}"),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// One chunk to send.
#[derive(Clone, Debug)]
pub struct ChunkUpload {
    pub upload_id: Option<String>,
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub data: Bytes,
}

impl ChunkUpload {
    fn form(&self) -> Form {
        let part = Part::stream_with_length(
            reqwest::Body::from(self.data.clone()),
            self.data.len() as u64,
        )
        .file_name(self.file_name.clone());
        let form = Form::new()
            .text("chunkNumber", self.chunk_number.to_string())
            .text("totalChunks", self.total_chunks.to_string())
            .text("originalFileName", self.file_name.clone());
        let form = match &self.upload_id {
            Some(id) => form.text("uploadId", id.clone()),
            None => form,
        };
        form.part("file", part)
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    pub max_chunk_size: u64,
    pub default_chunk_size: u64,
    pub recommended_parallelism: u32,
    #[serde(default)]
    pub partition_column: Option<String>,
    #[serde(default)]
    pub archive_entries: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub message: String,
    pub upload_id: String,
    #[serde(default)]
    pub received_chunks: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub received_chunks: Vec<u32>,
    pub total_chunks: Option<u32>,
    pub merging: bool,
}

impl UploadStatusResponse {
    /// Indices below `total_chunks` not yet received.
    pub fn missing_chunks(&self) -> Vec<u32> {
        let Some(total) = self.total_chunks else {
            return Vec::new();
        };
        (0..total)
            .filter(|i| self.received_chunks.binary_search(i).is_err())
            .collect()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub file_name: String,
    pub total_chunks: u32,
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub archive_name: String,
    #[serde(default)]
    pub positive_rows: u64,
    #[serde(default)]
    pub negative_rows: u64,
    #[serde(default)]
    pub merged_bytes: u64,
}
