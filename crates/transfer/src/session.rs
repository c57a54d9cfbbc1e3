use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifecycle of a client upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadStatus {
    Pending,
    InProgress,
    Merging,
    Completed,
    Failed,
}

/// Snapshot of an upload's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub file_id: String,
    pub status: UploadStatus,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub skipped_chunks: u32,
    pub transferred_bytes: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Tracks one file's chunk upload (thread-safe).
pub struct UploadSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    file_id: String,
    status: UploadStatus,
    total_chunks: u32,
    uploaded: BTreeSet<u32>,
    skipped: BTreeSet<u32>,
    transferred_bytes: u64,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    error: String,
}

impl UploadSession {
    /// Creates a new pending session for `total_chunks` chunks.
    pub fn new(file_id: impl Into<String>, total_chunks: u32) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                file_id: file_id.into(),
                status: UploadStatus::Pending,
                total_chunks,
                uploaded: BTreeSet::new(),
                skipped: BTreeSet::new(),
                transferred_bytes: 0,
                started_at: None,
                completed_at: None,
                error: String::new(),
            }),
        }
    }

    /// Marks the session as in progress.
    pub fn start(&self) {
        let mut s = self.write();
        s.status = UploadStatus::InProgress;
        s.started_at = Some(Instant::now());
    }

    /// Records a chunk sent by this client.
    pub fn mark_uploaded(&self, index: u32, bytes: u64) {
        let mut s = self.write();
        if s.uploaded.insert(index) {
            s.transferred_bytes += bytes;
        }
    }

    /// Records a chunk the server already had.
    pub fn mark_skipped(&self, index: u32) {
        let mut s = self.write();
        if !s.uploaded.contains(&index) {
            s.skipped.insert(index);
        }
    }

    /// Indices neither uploaded nor skipped yet, ascending.
    pub fn remaining(&self) -> Vec<u32> {
        let s = self.read();
        (0..s.total_chunks)
            .filter(|i| !s.uploaded.contains(i) && !s.skipped.contains(i))
            .collect()
    }

    /// Returns `true` once every chunk is accounted for.
    pub fn all_chunks_present(&self) -> bool {
        let s = self.read();
        s.uploaded.union(&s.skipped).count() as u64 == u64::from(s.total_chunks)
    }

    /// Marks the session as waiting on the server-side merge.
    pub fn begin_merge(&self) {
        self.write().status = UploadStatus::Merging;
    }

    /// Marks the session as completed.
    pub fn complete(&self) {
        let mut s = self.write();
        s.status = UploadStatus::Completed;
        s.completed_at = Some(Instant::now());
    }

    /// Marks the session as failed with an error message.
    pub fn fail(&self, err: &str) {
        let mut s = self.write();
        s.status = UploadStatus::Failed;
        s.error = err.to_string();
        s.completed_at = Some(Instant::now());
    }

    pub fn status(&self) -> UploadStatus {
        self.read().status
    }

    /// Time from [`start`](Self::start) to completion, or to now if still running.
    pub fn elapsed(&self) -> Option<Duration> {
        let s = self.read();
        let started = s.started_at?;
        Some(s.completed_at.unwrap_or_else(Instant::now) - started)
    }

    pub fn progress(&self) -> UploadProgress {
        let s = self.read();
        UploadProgress {
            file_id: s.file_id.clone(),
            status: s.status,
            total_chunks: s.total_chunks,
            uploaded_chunks: s.uploaded.len() as u32,
            skipped_chunks: s.skipped.len() as u32,
            transferred_bytes: s.transferred_bytes,
            error: s.error.clone(),
        }
    }

    // Counters only; a panicking writer cannot leave them inconsistent.
    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_pending() {
        let session = UploadSession::new("report.pdf", 3);
        assert_eq!(session.status(), UploadStatus::Pending);
        assert_eq!(session.remaining(), vec![0, 1, 2]);
        assert!(session.elapsed().is_none());
    }

    #[test]
    fn uploads_and_skips_are_tracked() {
        let session = UploadSession::new("report.pdf", 4);
        session.start();
        session.mark_skipped(0);
        session.mark_uploaded(2, 100);
        session.mark_uploaded(2, 100);

        let p = session.progress();
        assert_eq!(p.uploaded_chunks, 1);
        assert_eq!(p.skipped_chunks, 1);
        assert_eq!(p.transferred_bytes, 100);
        assert_eq!(session.remaining(), vec![1, 3]);
        assert!(!session.all_chunks_present());

        session.mark_uploaded(1, 50);
        session.mark_uploaded(3, 50);
        assert!(session.all_chunks_present());
    }

    #[test]
    fn lifecycle_to_completed() {
        let session = UploadSession::new("f", 1);
        session.start();
        session.mark_uploaded(0, 1);
        session.begin_merge();
        assert_eq!(session.status(), UploadStatus::Merging);

        session.complete();
        assert_eq!(session.status(), UploadStatus::Completed);
        assert!(session.elapsed().is_some());
    }

    #[test]
    fn fail_records_error() {
        let session = UploadSession::new("f", 1);
        session.start();
        session.fail("Combined hash mismatch");
        assert_eq!(session.status(), UploadStatus::Failed);
        assert_eq!(session.progress().error, "Combined hash mismatch");
    }

    #[test]
    fn progress_serializes_camel_case() {
        let session = UploadSession::new("f", 2);
        let json = serde_json::to_value(session.progress()).unwrap();
        assert_eq!(json["fileId"], "f");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["totalChunks"], 2);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let session = Arc::new(UploadSession::new("big.iso", 1000));
        session.start();

        let mut handles = vec![];

        // 10 writers, 100 distinct chunks each.
        for i in 0..10u32 {
            let s = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                for j in 0..100u32 {
                    s.mark_uploaded(i * 100 + j, 1);
                }
            }));
        }

        // 10 readers checking progress.
        for _ in 0..10 {
            let s = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _ = s.progress();
                    let _ = s.status();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(session.progress().transferred_bytes, 1000);
        assert!(session.all_chunks_present());
    }
}
