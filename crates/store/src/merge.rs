use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk_store::{StoredChunk, discard, remove_file_if_exists, temp_beside};
use crate::digest::{HashingWriter, hash_reader};
use crate::{ChunkStore, FileId, StoreError};

/// How many missing indices a [`StoreError::MissingChunks`] lists.
const MISSING_SAMPLE: usize = 16;

/// Parameters of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub file_id: FileId,
    /// Expected digest of the merged content, compared case-sensitively.
    pub expected_hash: String,
    /// Number of chunks the client split the file into, if known.
    pub total_chunks: Option<u32>,
}

impl MergeRequest {
    pub fn new(file_id: FileId, expected_hash: impl Into<String>) -> Self {
        Self {
            file_id,
            expected_hash: expected_hash.into(),
            total_chunks: None,
        }
    }

    /// Declares the chunk count so trailing missing chunks are detected.
    pub fn with_total_chunks(mut self, total: u32) -> Self {
        self.total_chunks = Some(total);
        self
    }
}

/// Result of a merge that ran to a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MergeOutcome {
    /// The merged file matched and is published; its chunks are gone.
    Success { file_id: FileId, hash: String },
    /// Nothing has been uploaded for this file.
    NoChunksFound,
    /// The merged content did not match; chunks are kept for a retry.
    HashMismatch { expected: String, actual: String },
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Success { .. } => "File merged successfully",
            Self::NoChunksFound => "No chunks found",
            Self::HashMismatch { .. } => "Combined hash mismatch",
        }
    }
}

/// Reassembles and verifies uploaded files.
pub struct MergeEngine {
    store: Arc<ChunkStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// Merges all chunks of `id` and checks the result against `expected_hash`.
    pub fn merge_chunks(
        &self,
        id: &FileId,
        expected_hash: &str,
    ) -> Result<MergeOutcome, StoreError> {
        self.merge(&MergeRequest::new(id.clone(), expected_hash))
    }

    /// Runs a merge.
    ///
    /// Holds the exclusive lock on the file throughout. The output is
    /// assembled in a hidden temporary file beside the target and hashed
    /// while written; only a verified file is renamed into place. Sequence
    /// defects (malformed names, duplicate or missing indices) are errors
    /// and leave everything as it was.
    pub fn merge(&self, request: &MergeRequest) -> Result<MergeOutcome, StoreError> {
        let id = &request.file_id;
        let _guard = self.store.locks().exclusive(id);

        let chunks = match self.store.stored_chunks(id)? {
            Some(chunks) if !chunks.is_empty() => chunks,
            _ => {
                info!(file = %id, "merge requested but no chunks found");
                return Ok(MergeOutcome::NoChunksFound);
            }
        };
        check_sequence(&chunks, request.total_chunks)?;

        let target = self.store.merged_path(id);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = temp_beside(&target);
        let (actual, size) = match self.assemble(id, &chunks, &temp) {
            Ok(assembled) => assembled,
            Err(e) => {
                discard(&temp);
                warn!(file = %id, error = %e, "merge failed");
                return Err(e);
            }
        };

        if actual != request.expected_hash {
            discard(&temp);
            warn!(
                file = %id,
                expected = %request.expected_hash,
                actual = %actual,
                "merged file hash mismatch, chunks kept"
            );
            return Ok(MergeOutcome::HashMismatch {
                expected: request.expected_hash.clone(),
                actual,
            });
        }

        if let Err(e) = fs::rename(&temp, &target) {
            discard(&temp);
            return Err(e.into());
        }
        info!(file = %id, chunks = chunks.len(), size, hash = %actual, "file merged");
        Ok(self.published(id, actual))
    }

    /// Outcome of a merge whose file is already in place.
    ///
    /// Failing to remove the consumed chunks does not undo the publish; the
    /// leftovers are logged and can be deleted later.
    fn published(&self, id: &FileId, hash: String) -> MergeOutcome {
        if let Err(e) = self.store.remove_group(id) {
            warn!(file = %id, error = %e, "merged file published but chunks not removed");
        }
        MergeOutcome::Success {
            file_id: id.clone(),
            hash,
        }
    }

    /// Indices of the chunks already stored for `id`, ascending and unique.
    pub fn existing_chunks(&self, id: &FileId) -> Result<Vec<u32>, StoreError> {
        let mut indices: Vec<u32> = self
            .store
            .list_chunks(id)?
            .into_iter()
            .map(|key| key.index)
            .collect();
        indices.dedup();
        Ok(indices)
    }

    /// Digest of the merged file for `id`, or `None` if there is none.
    pub fn file_hash(&self, id: &FileId) -> Result<Option<String>, StoreError> {
        let _guard = self.store.locks().shared(id);
        let file = match File::open(self.store.merged_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config = self.store.config();
        let (hash, _) = hash_reader(config.hash_algorithm, file, config.effective_buffer_size())?;
        Ok(Some(hash))
    }

    /// Deletes the merged file for `id`. Returns whether one existed.
    pub fn remove_merged_file(&self, id: &FileId) -> Result<bool, StoreError> {
        let _guard = self.store.locks().exclusive(id);
        let path = self.store.merged_path(id);
        let existed = path.is_file();
        remove_file_if_exists(&path)?;
        if existed {
            info!(file = %id, "merged file removed");
        }
        Ok(existed)
    }

    /// Concatenates `chunks` into `temp`, returning the digest and size.
    fn assemble(
        &self,
        id: &FileId,
        chunks: &[StoredChunk],
        temp: &Path,
    ) -> Result<(String, u64), StoreError> {
        let config = self.store.config();
        let file = File::create(temp)?;
        let buffered = BufWriter::with_capacity(config.effective_buffer_size(), file);
        let mut writer = HashingWriter::new(buffered, config.hash_algorithm);

        for chunk in chunks {
            let mut source = File::open(&chunk.path)?;
            let copied = io::copy(&mut source, &mut writer)?;
            drop(source);
            if config.eager_chunk_reclaim {
                fs::remove_file(&chunk.path)?;
            }
            debug!(file = %id, chunk = %chunk.key, copied, "chunk appended");
        }

        let (buffered, hash, size) = writer.into_parts();
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok((hash, size))
    }
}

/// Checks that `chunks` (sorted) are exactly the indices `0..N`.
///
/// `N` is `total` when given, otherwise the highest index plus one.
fn check_sequence(chunks: &[StoredChunk], total: Option<u32>) -> Result<(), StoreError> {
    for pair in chunks.windows(2) {
        if pair[0].key.index == pair[1].key.index {
            return Err(StoreError::DuplicateChunkIndex {
                index: pair[0].key.index,
                first: pair[0].key.hash.clone(),
                second: pair[1].key.hash.clone(),
            });
        }
    }

    let Some(last) = chunks.last() else {
        return Ok(());
    };
    match total {
        Some(total) if last.key.index >= total => {
            return Err(StoreError::ChunkOutOfRange {
                index: last.key.index,
                total,
            });
        }
        _ => {}
    }

    let expected = total.map_or(u64::from(last.key.index) + 1, u64::from);
    let count = expected - chunks.len() as u64;
    if count == 0 {
        return Ok(());
    }

    let mut sample = Vec::new();
    let mut present = chunks.iter().map(|c| c.key.index).peekable();
    let mut index: u64 = 0;
    while index < expected && sample.len() < MISSING_SAMPLE {
        if present.peek().is_some_and(|&p| u64::from(p) == index) {
            present.next();
        } else {
            // `index < expected <= u32::MAX + 1`
            sample.push(index as u32);
        }
        index += 1;
    }
    Err(StoreError::MissingChunks { count, sample })
}
