//! Subcommand handlers. Each prints one JSON document to stdout.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;

use chunkyard_store::{
    ChunkKey, FileId, HashAlgorithm, MergeEngine, MergeOutcome, MergeRequest, StoreError,
};
use chunkyard_transfer::{ChunkLayout, DEFAULT_CHUNK_SIZE};

use crate::cli::{Cli, Command};
use crate::upload;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    msg: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExistingChunksResponse {
    existing_chunks: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<ChunkKey>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileHashResponse {
    algorithm: HashAlgorithm,
    /// Empty when the file has not been merged.
    hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeResponse<'a> {
    msg: &'static str,
    #[serde(flatten)]
    outcome: &'a MergeOutcome,
}

pub async fn run(cli: Cli, engine: Arc<MergeEngine>) -> anyhow::Result<()> {
    let namespace = cli.namespace;
    let file_id = |name: &str| FileId::scoped(&namespace, name);

    match cli.command {
        Command::Put {
            file,
            index,
            hash,
            path,
        } => {
            let id = file_id(&file)?;
            let outcome = blocking(&engine, move |engine| {
                let reader: Box<dyn Read> = match &path {
                    Some(path) => Box::new(std::fs::File::open(path)?),
                    None => Box::new(std::io::stdin().lock()),
                };
                engine.store().put_chunk(&id, index, &hash, reader)
            })
            .await?;
            print_json(&MessageResponse {
                msg: outcome.message(),
            })
        }

        Command::List { file, with_hashes } => {
            let id = file_id(&file)?;
            let keys = blocking(&engine, move |engine| engine.store().list_chunks(&id)).await?;
            let mut existing_chunks: Vec<u32> = keys.iter().map(|k| k.index).collect();
            existing_chunks.dedup();
            print_json(&ExistingChunksResponse {
                existing_chunks,
                chunks: with_hashes.then_some(keys),
            })
        }

        Command::Merge { file, hash, total } => {
            let id = file_id(&file)?;
            let outcome = blocking(&engine, move |engine| match total {
                Some(total) => engine.merge(&MergeRequest::new(id, hash).with_total_chunks(total)),
                None => engine.merge_chunks(&id, &hash),
            })
            .await?;
            print_json(&MergeResponse {
                msg: outcome.message(),
                outcome: &outcome,
            })?;
            if !outcome.is_success() {
                bail!("{}", outcome.message());
            }
            Ok(())
        }

        Command::Hash { file } => {
            let id = file_id(&file)?;
            let hash = blocking(&engine, move |engine| engine.file_hash(&id)).await?;
            print_json(&FileHashResponse {
                algorithm: engine.store().config().hash_algorithm,
                hash: hash.unwrap_or_default(),
            })
        }

        Command::Delete {
            file,
            merged,
            chunk,
        } => {
            let id = file_id(&file)?;
            let key = chunk.as_deref().map(ChunkKey::parse).transpose()?;
            blocking(&engine, move |engine| match key {
                Some(key) => engine.store().delete_chunk(&id, &key),
                None if merged => engine.remove_merged_file(&id).map(|_| ()),
                None => engine.store().delete_group(&id),
            })
            .await?;
            print_json(&MessageResponse { msg: "Deleted" })
        }

        Command::Upload {
            path,
            file,
            chunk_size,
            parts,
            jobs,
        } => {
            let name = match file {
                Some(name) => name,
                None => local_file_name(&path)?,
            };
            let layout = match parts {
                Some(parts) => ChunkLayout::Parts(parts),
                None => ChunkLayout::FixedSize(chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)),
            };
            let report = upload::upload(engine, file_id(&name)?, path, layout, jobs).await?;
            print_json(&report)?;
            if !report.is_success() {
                bail!("upload of {name} did not complete");
            }
            Ok(())
        }
    }
}

/// Runs a store operation on the blocking pool.
async fn blocking<T, F>(engine: &Arc<MergeEngine>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&MergeEngine) -> Result<T, StoreError> + Send + 'static,
{
    let engine = Arc::clone(engine);
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}

fn local_file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive a file name from {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
