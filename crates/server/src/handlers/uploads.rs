//! Chunk intake and upload status endpoints.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, Path, State};
use bytes::Bytes;
use serde::Serialize;
use sieve_core::{ChunkSubmission, RawChunkMetadata, UploadId};
use sieve_pipeline::UploadStatus;
use std::time::Instant;

/// Response to a stored chunk.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub message: &'static str,
    /// Id to send with every further chunk of this upload.
    pub upload_id: UploadId,
    pub chunk_number: u32,
    pub received_chunks: u32,
    pub total_chunks: u32,
}

/// POST /api/files/chunks - Store one chunk.
///
/// Multipart form fields: `file` (payload), `chunkNumber`, `totalChunks`,
/// `originalFileName` (or `originalname`), and `uploadId` (or `fileId`),
/// which may only be omitted on chunk 0.
#[tracing::instrument(skip(state, multipart), fields(upload_id, chunk))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let started = Instant::now();
    let result = store_chunk(&state, multipart).await;
    match &result {
        Ok(_) => metrics::CHUNK_SAVE_DURATION.observe(started.elapsed().as_secs_f64()),
        Err(e) => metrics::record_upload_error(e.code()),
    }
    result.map(Json)
}

async fn store_chunk(state: &AppState, multipart: Multipart) -> ApiResult<ChunkUploadResponse> {
    let (raw, data) = read_chunk_form(multipart).await?;
    let data = data.ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;

    let max_chunk_size = state.config.server.max_chunk_size;
    if data.len() as u64 > max_chunk_size {
        return Err(ApiError::PayloadTooLarge(format!(
            "chunk of {} bytes exceeds the {max_chunk_size} byte limit",
            data.len()
        )));
    }

    let submission = ChunkSubmission::from_raw(raw, data)?;
    let size = submission.size();
    let saved = state.chunk_store.save(submission).await?;

    let span = tracing::Span::current();
    span.record("upload_id", tracing::field::display(saved.upload_id));
    span.record("chunk", saved.index.get());

    metrics::CHUNKS_RECEIVED.inc();
    metrics::CHUNK_BYTES_RECEIVED.inc_by(size);
    tracing::debug!(
        received = saved.received,
        total = saved.total_chunks,
        size_bytes = size,
        "Chunk stored"
    );

    Ok(ChunkUploadResponse {
        message: "Chunk uploaded successfully",
        upload_id: saved.upload_id,
        chunk_number: saved.index.get(),
        received_chunks: saved.received,
        total_chunks: saved.total_chunks,
    })
}

/// Collect the chunk metadata fields and the payload from a multipart form.
async fn read_chunk_form(
    mut multipart: Multipart,
) -> ApiResult<(RawChunkMetadata, Option<Bytes>)> {
    let mut raw = RawChunkMetadata::default();
    let mut data = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "file" => data = Some(field.bytes().await?),
            "chunkNumber" => raw.chunk_number = Some(field.text().await?),
            "totalChunks" => raw.total_chunks = Some(field.text().await?),
            "originalFileName" | "originalname" => {
                raw.original_file_name = Some(field.text().await?)
            }
            "uploadId" | "fileId" => raw.upload_id = Some(field.text().await?),
            other => tracing::debug!(field = %other, "Ignoring unknown form field"),
        }
    }
    Ok((raw, data))
}

/// GET /api/files/uploads/{upload_id} - Query what has been received.
#[tracing::instrument(skip(state))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStatus>> {
    let upload_id = UploadId::parse(&upload_id)?;
    let status = state.chunk_store.status(upload_id).await?;
    Ok(Json(status))
}
