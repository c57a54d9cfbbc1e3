//! Client side of a chunked upload.
//!
//! Splits a local file into indexed, hashed chunks, works out which chunks
//! the store is still missing, and tracks an upload session's progress.

mod chunked;
mod plan;
mod session;

pub use chunked::{Chunk, ChunkLayout, ChunkReader, chunk_count};
pub use plan::{ResumePlan, missing_indices};
pub use session::{UploadProgress, UploadSession, UploadStatus};

use chunkyard_store::StoreError;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid chunk layout: {0}")]
    InvalidLayout(String),

    #[error("file needs {0} chunks, more than an index can address")]
    TooManyChunks(u64),

    #[error("chunk index {index} out of range (file has {count} chunks)")]
    ChunkOutOfRange { index: u32, count: u32 },
}
