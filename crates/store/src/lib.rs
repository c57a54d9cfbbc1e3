//! Chunk store and merge engine for resumable chunked uploads.
//!
//! Clients upload numbered chunks of a file in any order, query which
//! chunks already exist to resume after an interruption, and finally ask
//! for a merge. The merge concatenates the chunks in ascending index
//! order, verifies the digest of the result against the client's expected
//! hash, and either publishes the merged file or discards it while
//! keeping the chunks for a retry.
//!
//! # Layout
//!
//! ```text
//! <root>/chunks/<namespace>/<name>/<index>_<hash>
//! <root>/merged/<namespace>/<name>
//! ```
//!
//! In-flight writes go to a hidden `.<name>.tmp.<uuid>` file beside their
//! destination and are renamed into place once complete.

mod chunk_store;
mod config;
mod digest;
mod id;
mod key;
mod lock;
mod merge;

pub use chunk_store::{ChunkStore, PutOutcome};
pub use config::{ROOT_ENV_VAR, StoreConfig};
pub use digest::{ContentHasher, HashAlgorithm, HashingWriter, hash_bytes, hash_file, hash_reader};
pub use id::{DEFAULT_NAMESPACE, FileId};
pub use key::{ChunkKey, KEY_SEPARATOR};
pub use lock::{FileLockGuard, FileLocks};
pub use merge::{MergeEngine, MergeOutcome, MergeRequest};

/// Directory holding one sub-directory of chunks per file.
pub const CHUNKS_DIR: &str = "chunks";

/// Directory holding verified merged files.
pub const MERGED_DIR: &str = "merged";

/// Marker in the name of an in-flight temporary file.
pub const TEMP_MARKER: &str = ".tmp.";

/// Age after which [`ChunkStore::open`] treats a temporary file as abandoned.
pub const STALE_TEMP_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// Default copy buffer size: 256 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Errors produced by the store and the merge engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    #[error("invalid chunk hash: {0}")]
    InvalidChunkHash(String),

    #[error("malformed chunk key: {0}")]
    MalformedChunkKey(String),

    #[error("chunk {index} hash mismatch: declared {declared}, computed {actual}")]
    ChunkHashMismatch {
        index: u32,
        declared: String,
        actual: String,
    },

    #[error("duplicate chunk index {index}: {first} and {second}")]
    DuplicateChunkIndex {
        index: u32,
        first: String,
        second: String,
    },

    #[error("{count} chunk(s) missing, first missing: {sample:?}")]
    MissingChunks { count: u64, sample: Vec<u32> },

    #[error("chunk index {index} outside declared total of {total}")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("config error: {0}")]
    Config(String),
}
