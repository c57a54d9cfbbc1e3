use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::digest::HashingWriter;
use crate::{
    CHUNKS_DIR, ChunkKey, FileId, FileLocks, MERGED_DIR, STALE_TEMP_AGE, StoreConfig, StoreError,
    TEMP_MARKER,
};

/// Result of [`ChunkStore::put_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PutOutcome {
    /// The chunk was written.
    Stored,
    /// A chunk with the same key was already present; nothing was written.
    AlreadyExists,
}

impl PutOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::Stored => "Chunk uploaded successfully",
            Self::AlreadyExists => "Chunk already exists",
        }
    }
}

/// A chunk found on disk.
#[derive(Debug, Clone)]
pub(crate) struct StoredChunk {
    pub key: ChunkKey,
    pub path: PathBuf,
}

/// Filesystem-backed chunk store.
///
/// Chunks of one file live in their own directory, one file per chunk,
/// named by [`ChunkKey`]. Writes go to a hidden temporary file in the same
/// directory and are renamed into place, so a listed chunk is always
/// complete.
pub struct ChunkStore {
    config: StoreConfig,
    locks: FileLocks,
}

impl ChunkStore {
    /// Opens (creating if needed) the store under `config.root`.
    ///
    /// Temporary files older than [`STALE_TEMP_AGE`] are left over from an
    /// interrupted process and removed. Younger ones may belong to another
    /// process writing to the same root and are kept.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        for dir in [CHUNKS_DIR, MERGED_DIR] {
            fs::create_dir_all(config.root.join(dir))?;
        }
        let store = Self {
            config,
            locks: FileLocks::new(),
        };
        let swept = store.sweep_stale_temps(STALE_TEMP_AGE)?;
        info!(
            root = %store.config.root.display(),
            algorithm = %store.config.hash_algorithm,
            swept,
            "chunk store opened"
        );
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn locks(&self) -> &FileLocks {
        &self.locks
    }

    /// Directory holding the chunks of `id`.
    pub fn group_dir(&self, id: &FileId) -> PathBuf {
        self.config.root.join(CHUNKS_DIR).join(id.relative_path())
    }

    /// Location of the merged file for `id`.
    pub fn merged_path(&self, id: &FileId) -> PathBuf {
        self.config.root.join(MERGED_DIR).join(id.relative_path())
    }


    /// Stores one chunk read from `reader`.
    ///
    /// Returns [`PutOutcome::AlreadyExists`] without reading `reader` when
    /// the key is already present. With `verify_chunk_hashes` on, the bytes
    /// are hashed while written and a mismatch stores nothing.
    pub fn put_chunk<R: Read>(
        &self,
        id: &FileId,
        index: u32,
        hash: &str,
        mut reader: R,
    ) -> Result<PutOutcome, StoreError> {
        let key = ChunkKey::new(index, hash)?;
        let _guard = self.locks.shared(id);

        let dir = self.group_dir(id);
        let target = dir.join(key.file_name());
        if target.exists() {
            debug!(file = %id, chunk = %key, "chunk already exists");
            return Ok(PutOutcome::AlreadyExists);
        }

        fs::create_dir_all(&dir)?;
        let temp = temp_beside(&target);
        let (actual, size) = match self.write_temp(&temp, &mut reader) {
            Ok(written) => written,
            Err(e) => {
                discard(&temp);
                return Err(e.into());
            }
        };

        if self.config.verify_chunk_hashes && actual != key.hash {
            discard(&temp);
            warn!(file = %id, chunk = %key, actual = %actual, "chunk hash mismatch");
            return Err(StoreError::ChunkHashMismatch {
                index,
                declared: key.hash,
                actual,
            });
        }

        if let Err(e) = fs::rename(&temp, &target) {
            discard(&temp);
            return Err(e.into());
        }

        debug!(file = %id, chunk = %key, size, "chunk stored");
        Ok(PutOutcome::Stored)
    }

    /// Lists the chunk keys of `id`, ordered by index then hash.
    ///
    /// A file with no chunk directory yields an empty list.
    pub fn list_chunks(&self, id: &FileId) -> Result<Vec<ChunkKey>, StoreError> {
        let _guard = self.locks.shared(id);
        let chunks = self.stored_chunks(id)?.unwrap_or_default();
        Ok(chunks.into_iter().map(|c| c.key).collect())
    }

    /// Removes one chunk, and the chunk directory if it became empty.
    pub fn delete_chunk(&self, id: &FileId, key: &ChunkKey) -> Result<(), StoreError> {
        let _guard = self.locks.exclusive(id);
        let dir = self.group_dir(id);
        remove_file_if_exists(&dir.join(key.file_name()))?;

        let empty = match fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if empty {
            fs::remove_dir(&dir)?;
        }
        debug!(file = %id, chunk = %key, "chunk deleted");
        Ok(())
    }

    /// Removes every chunk of `id`. Deleting an absent group is not an error.
    pub fn delete_group(&self, id: &FileId) -> Result<(), StoreError> {
        let _guard = self.locks.exclusive(id);
        self.remove_group(id)
    }

    /// Removes the chunk directory of `id`; caller holds the exclusive lock.
    pub(crate) fn remove_group(&self, id: &FileId) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.group_dir(id)) {
            Ok(()) => {
                debug!(file = %id, "chunk group removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Chunks of `id` sorted by key; `None` when the group does not exist.
    ///
    /// Caller holds a lock on `id`. In-flight temporary files are skipped;
    /// any other entry whose name is not a chunk key is an error.
    pub(crate) fn stored_chunks(
        &self,
        id: &FileId,
    ) -> Result<Option<Vec<StoredChunk>>, StoreError> {
        let entries = match fs::read_dir(self.group_dir(id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut chunks = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_str().ok_or_else(|| {
                StoreError::MalformedChunkKey(name.to_string_lossy().into_owned())
            })?;
            if is_temp_name(name) {
                continue;
            }
            let key = ChunkKey::parse(name)?;
            chunks.push(StoredChunk {
                key,
                path: entry.path(),
            });
        }
        chunks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Some(chunks))
    }

    fn write_temp<R: Read>(&self, temp: &Path, reader: &mut R) -> io::Result<(String, u64)> {
        let file = File::create(temp)?;
        let buffered = BufWriter::with_capacity(self.config.effective_buffer_size(), file);
        let mut writer = HashingWriter::new(buffered, self.config.hash_algorithm);
        io::copy(reader, &mut writer)?;

        let (buffered, hash, size) = writer.into_parts();
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok((hash, size))
    }

    /// Removes temporary files last modified more than `max_age` ago.
    ///
    /// Looks where temporaries are created: chunk group directories
    /// (`chunks/<ns>/<name>/`) and merged namespaces (`merged/<ns>/`).
    /// Returns the count removed.
    pub(crate) fn sweep_stale_temps(&self, max_age: Duration) -> Result<usize, StoreError> {
        let mut dirs = Vec::new();
        for namespace in subdirs(&self.config.root.join(CHUNKS_DIR))? {
            dirs.extend(subdirs(&namespace)?);
        }
        dirs.extend(subdirs(&self.config.root.join(MERGED_DIR))?);

        let now = SystemTime::now();
        let mut removed = 0;
        for dir in dirs {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                // Removed by a concurrent merge or delete.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let stale = entry.file_name().to_str().is_some_and(is_temp_name)
                    && entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|modified| now.duration_since(modified).ok())
                        .is_some_and(|age| age > max_age);
                if !stale {
                    continue;
                }
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "failed to sweep temp artifact")
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Hidden, unique temporary path in the same directory as `target`.
pub(crate) fn temp_beside(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}{TEMP_MARKER}{}", uuid::Uuid::new_v4()))
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

/// Sub-directories of `dir`; none if `dir` does not exist.
fn subdirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Removes `path`, treating absence as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Best-effort removal of a temporary artifact.
pub(crate) fn discard(path: &Path) {
    if let Err(e) = remove_file_if_exists(path) {
        warn!(path = %path.display(), error = %e, "failed to remove temp artifact");
    }
}
