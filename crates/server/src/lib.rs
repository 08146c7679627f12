//! HTTP API server for sieve.
//!
//! This crate provides the HTTP surface:
//! - Chunk upload and upload status
//! - Processing (merge, partition, archive) of a completed upload
//! - Archive download
//! - Health, capabilities and Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
