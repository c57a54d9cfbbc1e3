//! Resumable upload of a local file into the store.
//!
//! The whole file is hashed first. If the store already holds a merged file
//! with that hash nothing is sent. Otherwise only the chunk indices the store
//! is missing are uploaded, `jobs` at a time, and the file is merged.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use chunkyard_store::{FileId, MergeEngine, MergeRequest, PutOutcome, hash_file};
use chunkyard_transfer::{
    ChunkLayout, ChunkReader, ResumePlan, UploadProgress, UploadSession, UploadStatus,
};

/// Result of an upload, printed by the `upload` command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    #[serde(flatten)]
    pub progress: UploadProgress,
    /// Digest of the local file.
    pub hash: String,
    /// The store already had this exact file; no chunk was sent.
    pub already_merged: bool,
    pub elapsed_ms: u64,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.progress.status == UploadStatus::Completed
    }

    fn from_session(session: &UploadSession, hash: String, already_merged: bool) -> Self {
        Self {
            progress: session.progress(),
            hash,
            already_merged,
            elapsed_ms: session
                .elapsed()
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

pub async fn upload(
    engine: Arc<MergeEngine>,
    id: FileId,
    path: PathBuf,
    layout: ChunkLayout,
    jobs: usize,
) -> anyhow::Result<UploadReport> {
    let algorithm = engine.store().config().hash_algorithm;

    let (reader, local_hash) = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let reader = ChunkReader::new(&path, layout, algorithm)?;
            let hash = hash_file(algorithm, &path)
                .with_context(|| format!("hashing {}", path.display()))?;
            Ok((reader, hash))
        })
        .await??
    };
    let total = reader.chunk_count();
    info!(
        file = %id,
        path = %path.display(),
        size = reader.file_size(),
        chunk_size = reader.chunk_size(),
        chunks = total,
        hash = %local_hash,
        "starting upload"
    );

    let session = Arc::new(UploadSession::new(id.to_string(), total));
    session.start();

    let (merged_hash, existing) = {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            Ok((engine.file_hash(&id)?, engine.existing_chunks(&id)?))
        })
        .await??
    };

    if merged_hash.as_deref() == Some(local_hash.as_str()) {
        info!(file = %id, "file already merged, nothing to upload");
        for index in 0..total {
            session.mark_skipped(index);
        }
        session.complete();
        return Ok(UploadReport::from_session(&session, local_hash, true));
    }

    let plan = ResumePlan::new(total, &existing);
    for &index in &plan.existing {
        session.mark_skipped(index);
    }
    debug!(
        file = %id,
        existing = plan.existing.len(),
        missing = plan.missing.len(),
        "resume plan"
    );

    if plan.is_complete() {
        info!(file = %id, "all chunks already stored, merging");
    }

    let reader = Arc::new(Mutex::new(reader));
    let permits = Arc::new(Semaphore::new(jobs.max(1)));
    let mut tasks = JoinSet::new();

    for index in plan.missing {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let engine = Arc::clone(&engine);
        let reader = Arc::clone(&reader);
        let id = id.clone();
        tasks.spawn_blocking(move || -> anyhow::Result<(u32, u64, PutOutcome)> {
            let _permit = permit;
            let chunk = reader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read_chunk(index)?;
            let outcome =
                engine
                    .store()
                    .put_chunk(&id, chunk.index, &chunk.hash, chunk.data.as_slice())?;
            Ok((index, chunk.data.len() as u64, outcome))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok((index, bytes, PutOutcome::Stored)) => {
                debug!(file = %id, index, bytes, "chunk uploaded");
                session.mark_uploaded(index, bytes);
            }
            Ok((index, _, PutOutcome::AlreadyExists)) => session.mark_skipped(index),
            Err(err) => {
                warn!(file = %id, error = %err, "chunk upload failed");
                tasks.abort_all();
                session.fail(&format!("{err:#}"));
                return Ok(UploadReport::from_session(&session, local_hash, false));
            }
        }
    }

    if !session.all_chunks_present() {
        let missing = session.remaining();
        warn!(file = %id, missing = ?missing, "chunks unaccounted for, not merging");
        session.fail(&format!("{} chunks not uploaded", missing.len()));
        return Ok(UploadReport::from_session(&session, local_hash, false));
    }

    session.begin_merge();
    let request = MergeRequest::new(id.clone(), local_hash.clone()).with_total_chunks(total);
    let merged = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.merge(&request)).await?
    };

    match merged {
        Ok(outcome) if outcome.is_success() => session.complete(),
        Ok(outcome) => session.fail(outcome.message()),
        Err(err) => session.fail(&err.to_string()),
    }

    let report = UploadReport::from_session(&session, local_hash, false);
    info!(
        file = %id,
        status = ?session.status(),
        uploaded = report.progress.uploaded_chunks,
        skipped = report.progress.skipped_chunks,
        bytes = report.progress.transferred_bytes,
        "upload finished"
    );
    Ok(report)
}
