//! Per-file reader/writer locks.
//!
//! Uploads and reads of a file take a shared lock, merges and deletions an
//! exclusive one. Distinct files never contend. The underlying
//! `parking_lot::RwLock` is fair, so a steady stream of uploads cannot
//! starve a merge.
//!
//! These locks only order threads of one process sharing a [`ChunkStore`].
//! Separate processes on the same root are not serialized against each
//! other.
//!
//! [`ChunkStore`]: crate::ChunkStore

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::FileId;

type SharedGuard = ArcRwLockReadGuard<RawRwLock, ()>;
type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Table of locks keyed by [`FileId`]. Entries exist only while held or awaited.
#[derive(Debug, Default)]
pub struct FileLocks {
    table: DashMap<FileId, Arc<RwLock<()>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no exclusive holder exists for `id`.
    pub fn shared(&self, id: &FileId) -> FileLockGuard<'_> {
        let shared = self.lock_for(id).read_arc();
        FileLockGuard {
            locks: self,
            id: id.clone(),
            shared: Some(shared),
            exclusive: None,
        }
    }

    /// Blocks until `id` has no other holder.
    pub fn exclusive(&self, id: &FileId) -> FileLockGuard<'_> {
        let exclusive = self.lock_for(id).write_arc();
        FileLockGuard {
            locks: self,
            id: id.clone(),
            shared: None,
            exclusive: Some(exclusive),
        }
    }

    /// Number of files with a held or awaited lock.
    pub fn active(&self) -> usize {
        self.table.len()
    }

    fn lock_for(&self, id: &FileId) -> Arc<RwLock<()>> {
        Arc::clone(self.table.entry(id.clone()).or_default().value())
    }

    /// Drops the entry for `id` once nobody holds or awaits it.
    ///
    /// `remove_if` runs under the shard lock, so no new holder can clone the
    /// `Arc` between the check and the removal.
    fn evict(&self, id: &FileId) {
        self.table.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Held lock on one file; released on drop.
pub struct FileLockGuard<'a> {
    locks: &'a FileLocks,
    id: FileId,
    shared: Option<SharedGuard>,
    exclusive: Option<ExclusiveGuard>,
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.shared.take());
        drop(self.exclusive.take());
        self.locks.evict(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn id(name: &str) -> FileId {
        FileId::new(name).unwrap()
    }

    #[test]
    fn shared_locks_coexist() {
        let locks = FileLocks::new();
        let a = locks.shared(&id("f"));
        let b = locks.shared(&id("f"));
        assert_eq!(locks.active(), 1);
        drop(a);
        assert_eq!(locks.active(), 1);
        drop(b);
        assert_eq!(locks.active(), 0);
    }

    #[test]
    fn different_files_do_not_contend() {
        let locks = FileLocks::new();
        let _a = locks.exclusive(&id("a"));
        let _b = locks.exclusive(&id("b"));
        assert_eq!(locks.active(), 2);
    }

    #[test]
    fn exclusive_is_mutually_exclusive() {
        let locks = Arc::new(FileLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = locks.exclusive(&id("same"));
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[test]
    fn exclusive_waits_for_readers() {
        let locks = Arc::new(FileLocks::new());
        let reader = locks.shared(&id("f"));
        let acquired = Arc::new(AtomicUsize::new(0));

        let handle = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = locks.exclusive(&id("f"));
                acquired.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        drop(reader);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[test]
    fn waiting_writer_keeps_entry_alive() {
        let locks = Arc::new(FileLocks::new());
        let reader = locks.shared(&id("f"));

        let handle = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.exclusive(&id("f"));
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(locks.active(), 1);
        drop(reader);
        handle.join().unwrap();
        assert_eq!(locks.active(), 0);
    }
}
