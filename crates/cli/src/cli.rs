use std::path::PathBuf;

use chunkyard_store::DEFAULT_NAMESPACE;
use clap::{Parser, Subcommand};

/// Resumable chunked upload store.
///
/// Per-file locking only covers one process. Commands run at the same time
/// from separate processes against one root are not serialized, so do not
/// merge or delete a file while another process uploads or merges it.
#[derive(Debug, Parser)]
#[command(name = "chunkyard", version, about)]
pub struct Cli {
    /// JSON store configuration file.
    #[arg(long, global = true, default_value = "chunkyard.json")]
    pub config: PathBuf,

    /// Storage root, overriding the configuration.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Namespace the file names belong to.
    #[arg(long, global = true, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store one chunk, read from PATH or stdin.
    Put {
        #[arg(long)]
        file: String,
        #[arg(long)]
        index: u32,
        #[arg(long)]
        hash: String,
        path: Option<PathBuf>,
    },

    /// List the chunks stored for a file.
    List {
        #[arg(long)]
        file: String,
        /// Include each chunk's hash.
        #[arg(long)]
        with_hashes: bool,
    },

    /// Merge a file's chunks and verify the result.
    Merge {
        #[arg(long)]
        file: String,
        /// Expected hash of the merged file.
        #[arg(long)]
        hash: String,
        /// Number of chunks the file was split into.
        #[arg(long)]
        total: Option<u32>,
    },

    /// Print the hash of a merged file, empty if not merged.
    Hash {
        #[arg(long)]
        file: String,
    },

    /// Delete a file's chunks, one chunk with --chunk, or its merged file
    /// with --merged.
    Delete {
        #[arg(long)]
        file: String,
        #[arg(long, conflicts_with = "chunk")]
        merged: bool,
        /// Stored chunk name, `<index>_<hash>`.
        #[arg(long)]
        chunk: Option<String>,
    },

    /// Split a local file, upload the missing chunks and merge.
    Upload {
        path: PathBuf,
        /// Upload name; defaults to the local file name.
        #[arg(long)]
        file: Option<String>,
        /// Chunk size in bytes.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Split into this many parts instead of fixed-size chunks.
        #[arg(long, conflicts_with = "chunk_size")]
        parts: Option<usize>,
        /// Chunks uploaded concurrently.
        #[arg(long, default_value_t = 4)]
        jobs: usize,
    },
}
