//! Chunk persistence and the per-upload registry.
//!
//! The registry is the only shared mutable state in the upload path. Each
//! upload gets a slot recording what its first chunk declared, the indices
//! received so far and whether a merge owns it. A slot's gate is held shared
//! by chunk writes and exclusively by a merge, so a merge never observes a
//! half-finished save and saves never race a merge that is deleting chunks.

use crate::error::{PipelineError, PipelineResult};
use serde::Serialize;
use sieve_core::chunk::{chunk_key, chunk_prefix, parse_chunk_key};
use sieve_core::{ChunkIndex, ChunkSubmission, FileName, MergeRequest, UploadId};
use sieve_storage::{ByteStream, ObjectStore, StorageError};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::instrument;

type Registry = Arc<Mutex<HashMap<UploadId, Arc<UploadSlot>>>>;

struct UploadSlot {
    file_name: FileName,
    total_chunks: u32,
    gate: Arc<RwLock<()>>,
    progress: Mutex<SlotProgress>,
}

struct SlotProgress {
    received: BTreeSet<u32>,
    merging: bool,
    last_touched: Instant,
}

impl UploadSlot {
    fn new(file_name: FileName, total_chunks: u32) -> Self {
        Self {
            file_name,
            total_chunks,
            gate: Arc::new(RwLock::new(())),
            progress: Mutex::new(SlotProgress {
                received: BTreeSet::new(),
                merging: false,
                last_touched: Instant::now(),
            }),
        }
    }

    fn progress(&self) -> MutexGuard<'_, SlotProgress> {
        // A poisoned lock only means another thread panicked mid-update of a
        // plain set; the data is still usable.
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the slot can leave the registry: not merging and no chunk
    /// write holding the gate.
    fn is_quiescent(&self) -> bool {
        !self.progress().merging && self.gate.try_write().is_ok()
    }

    fn check_declaration(
        &self,
        upload_id: UploadId,
        file_name: &FileName,
        total_chunks: u32,
    ) -> PipelineResult<()> {
        if self.total_chunks != total_chunks {
            return Err(PipelineError::UploadMismatch {
                upload_id,
                message: format!(
                    "totalChunks {total_chunks} differs from declared {}",
                    self.total_chunks
                ),
            });
        }
        if &self.file_name != file_name {
            return Err(PipelineError::UploadMismatch {
                upload_id,
                message: format!(
                    "file name {file_name} differs from declared {}",
                    self.file_name
                ),
            });
        }
        Ok(())
    }
}

/// Clears the merging flag if a claim is abandoned while waiting for the gate.
struct ClaimReset<'a> {
    slot: &'a UploadSlot,
    armed: bool,
}

impl Drop for ClaimReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.progress().merging = false;
        }
    }
}

/// Acknowledgement for one stored chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedChunk {
    pub upload_id: UploadId,
    pub index: ChunkIndex,
    /// Distinct indices received for this upload since the server started.
    pub received: u32,
    pub total_chunks: u32,
}

/// Progress of one upload, inferred from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatus {
    pub upload_id: UploadId,
    /// Indices currently present in storage, ascending.
    pub received_chunks: Vec<u32>,
    /// Declared total, when a chunk of this upload was seen by this process.
    pub total_chunks: Option<u32>,
    pub merging: bool,
}

impl UploadStatus {
    /// Whether every index in `0..total` is present.
    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        match self.total_chunks {
            Some(total) => {
                self.received_chunks.len() == total as usize
                    && self.received_chunks.iter().copied().eq(0..total)
            }
            None => false,
        }
    }
}

/// Exclusive right to consume an upload's chunks.
///
/// Holding a claim blocks chunk writes for the upload. Dropping it forgets
/// the upload in the registry, whether the merge succeeded or not.
pub struct MergeClaim {
    upload_id: UploadId,
    slot: Arc<UploadSlot>,
    registry: Registry,
    _gate: OwnedRwLockWriteGuard<()>,
}

impl MergeClaim {
    pub fn upload_id(&self) -> UploadId {
        self.upload_id
    }

    pub fn file_name(&self) -> &FileName {
        &self.slot.file_name
    }

    pub fn total_chunks(&self) -> u32 {
        self.slot.total_chunks
    }
}

impl Drop for MergeClaim {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = registry.get(&self.upload_id)
            && Arc::ptr_eq(current, &self.slot)
        {
            registry.remove(&self.upload_id);
        }
    }
}

impl std::fmt::Debug for MergeClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeClaim")
            .field("upload_id", &self.upload_id)
            .field("file_name", &self.slot.file_name)
            .field("total_chunks", &self.slot.total_chunks)
            .finish()
    }
}

/// Idle time after which an upload leaves the registry, unless configured.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Durable chunk storage keyed by `(upload, index)`.
pub struct ChunkStore {
    storage: Arc<dyn ObjectStore>,
    registry: Registry,
    idle_timeout: Duration,
}

impl ChunkStore {
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            registry: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Forget uploads that saw no chunk for `idle_timeout`.
    ///
    /// Only the registry entry goes; stored chunks stay, and a later chunk
    /// or merge request re-declares the upload.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The underlying object store.
    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<UploadId, Arc<UploadSlot>>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop idle, quiescent slots. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let mut registry = self.registry();
        self.evict_idle_locked(&mut registry)
    }

    fn evict_idle_locked(&self, registry: &mut HashMap<UploadId, Arc<UploadSlot>>) -> usize {
        let before = registry.len();
        let idle_timeout = self.idle_timeout;
        registry.retain(|_, slot| {
            let idle = slot.progress().last_touched.elapsed() >= idle_timeout;
            !(idle && slot.is_quiescent())
        });
        let evicted = before - registry.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle uploads");
        }
        evicted
    }

    /// Uploads currently tracked in memory.
    pub fn tracked_uploads(&self) -> usize {
        self.registry().len()
    }

    /// Remove `slot` if it is still registered, never received a chunk and
    /// nothing else is using it.
    fn forget_if_unused(&self, upload_id: UploadId, slot: &Arc<UploadSlot>) {
        let mut registry = self.registry();
        if let Some(current) = registry.get(&upload_id)
            && Arc::ptr_eq(current, slot)
            && slot.progress().received.is_empty()
            && slot.is_quiescent()
        {
            registry.remove(&upload_id);
        }
    }

    /// Persist one chunk.
    ///
    /// Chunk 0 without an upload ID starts a new upload and mints its ID.
    /// Re-saving an index overwrites it. The write is atomic: on error no
    /// chunk becomes visible.
    #[instrument(skip(self, submission), fields(upload_id, chunk = %submission.index, size = submission.size()))]
    pub async fn save(&self, submission: ChunkSubmission) -> PipelineResult<SavedChunk> {
        let ChunkSubmission {
            upload_id,
            index,
            total_chunks,
            file_name,
            data,
        } = submission;
        let upload_id = upload_id.unwrap_or_else(UploadId::new);
        tracing::Span::current().record("upload_id", tracing::field::display(upload_id));

        let slot = {
            let mut registry = self.registry();
            if !registry.contains_key(&upload_id) {
                self.evict_idle_locked(&mut registry);
            }
            let slot = registry
                .entry(upload_id)
                .or_insert_with(|| Arc::new(UploadSlot::new(file_name.clone(), total_chunks)))
                .clone();
            slot.check_declaration(upload_id, &file_name, total_chunks)?;
            slot.progress().last_touched = Instant::now();
            slot
        };
        if slot.progress().merging {
            return Err(PipelineError::MergeInProgress(upload_id));
        }

        let gate = slot.gate.read().await;
        // A merge may have claimed the slot while this save waited for the gate.
        if slot.progress().merging {
            return Err(PipelineError::MergeInProgress(upload_id));
        }

        let key = chunk_key(upload_id, &file_name, index);
        if let Err(e) = self.storage.put(&key, data).await {
            drop(gate);
            self.forget_if_unused(upload_id, &slot);
            return Err(e.into());
        }

        let received = {
            let mut progress = slot.progress();
            progress.received.insert(index.get());
            progress.last_touched = Instant::now();
            progress.received.len() as u32
        };
        drop(gate);

        tracing::debug!(received, total_chunks, "Chunk stored");
        Ok(SavedChunk {
            upload_id,
            index,
            received,
            total_chunks,
        })
    }

    /// Take exclusive ownership of an upload for merging.
    ///
    /// Fails with a conflict when a merge for the upload is already in flight.
    /// Waits for chunk writes already underway to finish.
    #[instrument(skip(self, request), fields(upload_id = %request.upload_id))]
    pub async fn claim_merge(&self, request: &MergeRequest) -> PipelineResult<MergeClaim> {
        let upload_id = request.upload_id;
        let slot = {
            let mut registry = self.registry();
            // After a restart the registry is empty; the request's declaration stands in.
            let slot = registry
                .entry(upload_id)
                .or_insert_with(|| {
                    Arc::new(UploadSlot::new(
                        request.file_name.clone(),
                        request.total_chunks,
                    ))
                })
                .clone();
            slot.check_declaration(upload_id, &request.file_name, request.total_chunks)?;

            let mut progress = slot.progress();
            if progress.merging {
                return Err(PipelineError::MergeInProgress(upload_id));
            }
            progress.merging = true;
            drop(progress);
            slot
        };

        let gate = {
            let mut reset = ClaimReset {
                slot: slot.as_ref(),
                armed: true,
            };
            let gate = slot.gate.clone().write_owned().await;
            reset.armed = false;
            gate
        };
        tracing::debug!("Merge claimed");
        Ok(MergeClaim {
            upload_id,
            slot,
            registry: self.registry.clone(),
            _gate: gate,
        })
    }

    /// Indices present in storage for an upload, ascending.
    pub async fn stored_indices(&self, upload_id: UploadId) -> PipelineResult<Vec<u32>> {
        let keys = self.storage.list(&chunk_prefix(upload_id)).await?;
        let mut indices: Vec<u32> = keys
            .iter()
            .filter_map(|key| parse_chunk_key(key))
            .map(ChunkIndex::get)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    /// Report what is stored for an upload.
    #[instrument(skip(self))]
    pub async fn status(&self, upload_id: UploadId) -> PipelineResult<UploadStatus> {
        let received_chunks = self.stored_indices(upload_id).await?;
        let slot = self.registry().get(&upload_id).cloned();

        if received_chunks.is_empty() && slot.is_none() {
            return Err(PipelineError::UnknownUpload(upload_id));
        }

        let (total_chunks, merging) = match &slot {
            Some(slot) => (Some(slot.total_chunks), slot.progress().merging),
            None => (None, false),
        };
        Ok(UploadStatus {
            upload_id,
            received_chunks,
            total_chunks,
            merging,
        })
    }

    /// Open one chunk of a claimed upload for reading.
    pub(crate) async fn open_chunk(
        &self,
        claim: &MergeClaim,
        index: ChunkIndex,
    ) -> PipelineResult<ByteStream> {
        let key = chunk_key(claim.upload_id, claim.file_name(), index);
        self.storage.get_stream(&key).await.map_err(|e| match e {
            StorageError::NotFound(_) => PipelineError::MissingChunk {
                upload_id: claim.upload_id,
                index,
            },
            other => other.into(),
        })
    }

    /// Delete one consumed chunk of a claimed upload.
    pub(crate) async fn remove_chunk(
        &self,
        claim: &MergeClaim,
        index: ChunkIndex,
    ) -> PipelineResult<()> {
        let key = chunk_key(claim.upload_id, claim.file_name(), index);
        match self.storage.delete(&key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read one stored chunk outside of a merge.
    #[cfg(test)]
    pub(crate) async fn read_chunk(
        &self,
        upload_id: UploadId,
        file_name: &FileName,
        index: ChunkIndex,
    ) -> PipelineResult<bytes::Bytes> {
        let key = chunk_key(upload_id, file_name, index);
        self.storage.get(&key).await.map_err(|e| match e {
            StorageError::NotFound(_) => PipelineError::MissingChunk { upload_id, index },
            other => other.into(),
        })
    }
}
