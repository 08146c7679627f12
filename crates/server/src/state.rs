//! Application state shared across handlers.

use sieve_core::config::AppConfig;
use sieve_pipeline::{ChunkStore, Pipeline};
use sieve_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Chunk persistence and per-upload bookkeeping.
    pub chunk_store: Arc<ChunkStore>,
    /// Merge, partition and archive.
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Create the application state over a chunk object store.
    ///
    /// The configuration is expected to be validated already.
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>) -> Self {
        let chunk_store = Arc::new(
            ChunkStore::new(storage).with_idle_timeout(config.pipeline.upload_idle_timeout()),
        );
        let pipeline = Arc::new(Pipeline::new(chunk_store.clone(), &config));
        Self {
            config: Arc::new(config),
            chunk_store,
            pipeline,
        }
    }
}
