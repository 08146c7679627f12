//! Object storage abstraction and backends for sieve.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait the chunk store is written against
//! - Atomic, traversal-safe local filesystem storage

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore};

use sieve_core::config::StorageConfig;
use std::sync::Arc;

/// Create the chunk object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;
    let backend = FilesystemBackend::new(&config.upload_dir).await?;
    Ok(Arc::new(backend))
}
