//! Capability discovery endpoint.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Recommended number of chunk uploads in flight per client.
const RECOMMENDED_PARALLELISM: u32 = 4;

/// Capabilities response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    /// Maximum chunk size in bytes.
    pub max_chunk_size: u64,
    /// Default chunk size in bytes.
    pub default_chunk_size: u64,
    /// Recommended parallel upload count.
    pub recommended_parallelism: u32,
    /// Header name used to partition rows.
    pub partition_column: String,
    /// Entry names inside a produced archive.
    pub archive_entries: [String; 2],
}

/// GET /api/files/capabilities
pub async fn get_capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    let partition = &state.config.partition;
    let max_chunk_size = state.config.server.max_chunk_size;
    Json(CapabilitiesResponse {
        max_chunk_size,
        default_chunk_size: sieve_core::DEFAULT_CHUNK_SIZE.min(max_chunk_size),
        recommended_parallelism: RECOMMENDED_PARALLELISM,
        partition_column: partition.column.clone(),
        archive_entries: [
            partition.positive_file_name.clone(),
            partition.negative_file_name.clone(),
        ],
    })
}
