//! Archive download endpoint.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use sieve_core::ArchiveName;
use tokio_util::io::ReaderStream;

/// GET /api/files/download/{archive_name} - Stream a produced archive.
#[tracing::instrument(skip(state))]
pub async fn download_archive(
    State(state): State<AppState>,
    Path(archive_name): Path<String>,
) -> ApiResult<Response> {
    let name = ArchiveName::parse(&archive_name)?;
    let path = state.pipeline.archive_path(&name);

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("archive not found: {name}")));
        }
        Err(e) => return Err(ApiError::Internal(format!("failed to open archive: {e}"))),
    };
    let size = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to stat archive: {e}")))?
        .len();

    metrics::ARCHIVES_DOWNLOADED.inc();
    tracing::info!(archive = %name, size_bytes = size, "Serving archive");

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/zip".to_string()),
            (CONTENT_LENGTH, size.to_string()),
            (CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
