//! Processing trigger: merge, partition and archive one upload.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use serde::Serialize;
use sieve_core::{MergeRequest, RawMergeRequest};
use sieve_pipeline::PipelineRun;

/// Maximum body size for a processing request (64 KiB).
const MAX_PROCESS_BODY_SIZE: usize = 64 * 1024;

/// Response to a finished processing run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    /// Name to pass to the download endpoint.
    pub archive_name: String,
    pub positive_rows: u64,
    pub negative_rows: u64,
    pub merged_bytes: u64,
}

/// POST /api/files/process - Run the pipeline for a fully uploaded file.
///
/// The run executes on its own task, so it completes even if the client
/// disconnects before the response is ready.
#[tracing::instrument(skip(state, req), fields(upload_id))]
pub async fn process_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<ProcessResponse>> {
    let request = parse_process_request(req).await?;
    tracing::Span::current().record("upload_id", tracing::field::display(request.upload_id));

    let pipeline = state.pipeline.clone();
    let handle = tokio::spawn(async move {
        let mut run = PipelineRun::new(request);
        pipeline.execute(&mut run).await
    });

    let outcome = handle
        .await
        .map_err(|e| ApiError::Internal(format!("pipeline task failed: {e}")))?;
    let processed = match outcome {
        Ok(processed) => processed,
        Err(e) => {
            let err = ApiError::from(e);
            metrics::record_pipeline_failure(err.code());
            return Err(err);
        }
    };
    metrics::record_pipeline_success(&processed);

    Ok(Json(ProcessResponse {
        archive_name: processed.archive_name.to_string(),
        positive_rows: processed.positive_rows,
        negative_rows: processed.negative_rows,
        merged_bytes: processed.merged_bytes,
    }))
}

async fn parse_process_request(req: Request) -> ApiResult<MergeRequest> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_PROCESS_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;
    let raw: RawMergeRequest = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;
    Ok(MergeRequest::try_from(raw)?)
}
