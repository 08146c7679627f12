//! Chunk metadata and storage keys.

use crate::upload::{FileName, UploadId, parse_count, validate_total_chunks};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a chunk within its upload (0-indexed).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkIndex(u32);

impl ChunkIndex {
    /// Create a chunk index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the first chunk of an upload.
    pub fn is_first(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkIndex({})", self.0)
    }
}

impl fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object store prefix holding every chunk of an upload.
pub fn chunk_prefix(upload_id: UploadId) -> String {
    format!("chunks/{upload_id}/")
}

/// Object store key for one chunk.
pub fn chunk_key(upload_id: UploadId, file_name: &FileName, index: ChunkIndex) -> String {
    format!("{}{}.part_{}", chunk_prefix(upload_id), file_name, index)
}

/// Recover the chunk index from an object key produced by [`chunk_key`].
pub fn parse_chunk_key(key: &str) -> Option<ChunkIndex> {
    let (_, suffix) = key.rsplit_once(".part_")?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok().map(ChunkIndex)
}

/// Chunk metadata as received from a caller, before validation.
///
/// Every field is the raw text the caller sent; absent fields are `None`.
#[derive(Clone, Debug, Default)]
pub struct RawChunkMetadata {
    pub chunk_number: Option<String>,
    pub total_chunks: Option<String>,
    pub original_file_name: Option<String>,
    pub upload_id: Option<String>,
}

/// A validated chunk ready to be persisted.
#[derive(Clone)]
pub struct ChunkSubmission {
    /// Upload this chunk belongs to. `None` only for the first chunk of a new upload.
    pub upload_id: Option<UploadId>,
    pub index: ChunkIndex,
    pub total_chunks: u32,
    pub file_name: FileName,
    pub data: Bytes,
}

impl ChunkSubmission {
    /// Validate raw metadata and pair it with the chunk payload.
    ///
    /// A missing upload ID is only allowed for chunk 0; every later chunk must
    /// carry the identifier minted for chunk 0.
    pub fn from_raw(raw: RawChunkMetadata, data: Bytes) -> crate::Result<Self> {
        let index = raw
            .chunk_number
            .as_deref()
            .ok_or_else(|| crate::Error::InvalidChunkMetadata("chunkNumber is required".into()))
            .and_then(|s| {
                parse_count("chunkNumber", s).map_err(crate::Error::InvalidChunkMetadata)
            })
            .map(ChunkIndex)?;

        let total_chunks = raw
            .total_chunks
            .as_deref()
            .ok_or_else(|| crate::Error::InvalidChunkMetadata("totalChunks is required".into()))
            .and_then(|s| {
                parse_count("totalChunks", s).map_err(crate::Error::InvalidChunkMetadata)
            })?;
        validate_total_chunks(total_chunks).map_err(crate::Error::InvalidChunkMetadata)?;

        if index.get() >= total_chunks {
            return Err(crate::Error::InvalidChunkMetadata(format!(
                "chunkNumber {index} out of range for totalChunks {total_chunks}"
            )));
        }

        let file_name = raw
            .original_file_name
            .as_deref()
            .ok_or_else(|| {
                crate::Error::InvalidChunkMetadata("originalFileName is required".into())
            })
            .and_then(FileName::parse)?;

        let upload_id = match raw.upload_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(UploadId::parse(id)?),
            _ if index.is_first() => None,
            _ => {
                return Err(crate::Error::InvalidChunkMetadata(format!(
                    "uploadId is required for chunk {index}"
                )));
            }
        };

        Ok(Self {
            upload_id,
            index,
            total_chunks,
            file_name,
            data,
        })
    }

    /// Get the chunk size.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for ChunkSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSubmission")
            .field("upload_id", &self.upload_id)
            .field("index", &self.index)
            .field("total_chunks", &self.total_chunks)
            .field("file_name", &self.file_name)
            .field("size", &self.data.len())
            .finish()
    }
}
