//! Store configuration.
//!
//! Read from a camelCase JSON file; every field is optional and falls back
//! to its default.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_BUFFER_SIZE, HashAlgorithm, StoreError};

/// Environment variable that overrides [`StoreConfig::root`].
pub const ROOT_ENV_VAR: &str = "CHUNKYARD_ROOT";

/// Smallest copy buffer the store will use.
const MIN_BUFFER_SIZE: usize = 4 * 1024;

/// Configuration for a [`ChunkStore`](crate::ChunkStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Root of the upload tree.
    pub root: PathBuf,
    /// Digest for chunk verification and merged-file hashes.
    pub hash_algorithm: HashAlgorithm,
    /// Recompute each chunk's hash on upload and reject mismatches.
    pub verify_chunk_hashes: bool,
    /// Delete each chunk as soon as it has been appended during a merge.
    ///
    /// Halves peak disk usage for large files, but a hash mismatch then
    /// loses the consumed chunks.
    pub eager_chunk_reclaim: bool,
    /// Copy buffer size in bytes.
    pub buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            hash_algorithm: HashAlgorithm::default(),
            verify_chunk_hashes: false,
            eager_chunk_reclaim: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Loads configuration from `path`, then applies [`ROOT_ENV_VAR`].
    ///
    /// A missing file yields the defaults; an unparsable one is an error.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<StoreConfig>(&content)
                .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?
        } else {
            tracing::debug!(path = %path.display(), "no store config file, using defaults");
            StoreConfig::default()
        };
        config.apply_root_override(std::env::var_os(ROOT_ENV_VAR));
        Ok(config)
    }

    /// Copy buffer size, clamped to a sane minimum.
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }

    fn apply_root_override(&mut self, value: Option<OsString>) {
        if let Some(root) = value.filter(|v| !v.is_empty()) {
            self.root = PathBuf::from(root);
        }
    }
}
