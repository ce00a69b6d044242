//! Cache entries and their lock protocol
//!
//! A [`CacheEntry`] owns the staged files of one logical resource. Access to
//! those files goes through a reader-writer lock held by the entry:
//!
//! - population and cleanup hold the write lock;
//! - readers hold the read lock for as long as they use the files;
//! - a populated entry is published to readers by downgrading the write
//!   lock into a read lock, so every later reader sees complete files.
//!
//! Guards release their lock when dropped; `release()` is provided for call
//! sites that want the release to be explicit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use crate::app::resource::CacheKey;

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// Published as a placeholder; staging in progress
    Pending,
    /// All parts staged; readable
    Ready,
    /// Files deleted (or never completed); must not be read
    Evicted,
}

/// State protected by the entry lock
#[derive(Debug)]
pub struct EntryFiles {
    state: EntryState,
    files: Vec<PathBuf>,
}

/// Outcome of deleting an entry's staged files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files removed from disk
    pub files_deleted: usize,
    /// Files that could not be removed (already gone, permissions, ...)
    pub failures: usize,
}

/// Cached state for one logical resource
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    local_dir: PathBuf,
    lock: Arc<RwLock<EntryFiles>>,
}

impl CacheEntry {
    /// Create a new entry in the `Pending` state
    pub fn new(key: CacheKey, local_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            key,
            local_dir,
            lock: Arc::new(RwLock::new(EntryFiles {
                state: EntryState::Pending,
                files: Vec::new(),
            })),
        })
    }

    /// Key of the resource this entry stages
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Directory the staged files live in
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Wait for a read lock
    ///
    /// Blocks while population or cleanup holds the write lock, and behind
    /// any writer already queued.
    pub async fn acquire_read(self: &Arc<Self>) -> EntryReadGuard {
        debug!("Acquiring read lock on {}", self.key);
        let guard = Arc::clone(&self.lock).read_owned().await;
        EntryReadGuard {
            entry: Arc::clone(self),
            guard,
        }
    }

    /// Wait for the write lock
    ///
    /// Blocks until every reader has released and any in-progress
    /// population has downgraded.
    pub async fn acquire_write(self: &Arc<Self>) -> EntryWriteGuard {
        debug!("Acquiring write lock on {}", self.key);
        let guard = Arc::clone(&self.lock).write_owned().await;
        EntryWriteGuard {
            entry: Arc::clone(self),
            guard,
        }
    }

    /// Take the write lock only if nobody holds the lock
    pub fn try_acquire_write(self: &Arc<Self>) -> Option<EntryWriteGuard> {
        Arc::clone(&self.lock)
            .try_write_owned()
            .ok()
            .map(|guard| EntryWriteGuard {
                entry: Arc::clone(self),
                guard,
            })
    }

    /// Delete the staged files and mark the entry `Evicted`
    ///
    /// Waits for the write lock, so this does not return while any reader
    /// still holds the entry. Deletion failures are logged and counted, never
    /// returned. An entry that is already `Evicted` is left alone, since a
    /// newer entry may have staged into the same directory.
    pub async fn cleanup(self: &Arc<Self>) -> CleanupReport {
        let mut guard = self.acquire_write().await;
        if guard.state() == EntryState::Evicted {
            guard.release();
            return CleanupReport::default();
        }
        let report = guard.delete_files().await;
        guard.mark_evicted();
        guard.release();
        report
    }
}

/// Read lock on a cache entry
#[derive(Debug)]
pub struct EntryReadGuard {
    entry: Arc<CacheEntry>,
    guard: OwnedRwLockReadGuard<EntryFiles>,
}

impl EntryReadGuard {
    /// State observed under the lock
    pub fn state(&self) -> EntryState {
        self.guard.state
    }

    /// Whether the staged files are complete and readable
    pub fn is_ready(&self) -> bool {
        self.guard.state == EntryState::Ready
    }

    /// The locked entry
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// Key of the locked entry
    pub fn key(&self) -> &CacheKey {
        &self.entry.key
    }

    /// Directory the staged files live in
    pub fn local_dir(&self) -> &Path {
        &self.entry.local_dir
    }

    /// Staged files owned by the entry
    pub fn files(&self) -> &[PathBuf] {
        &self.guard.files
    }

    /// Release the read lock
    pub fn release(self) {
        debug!("Releasing read lock on {}", self.entry.key);
    }
}

/// Write lock on a cache entry
#[derive(Debug)]
pub struct EntryWriteGuard {
    entry: Arc<CacheEntry>,
    guard: OwnedRwLockWriteGuard<EntryFiles>,
}

impl EntryWriteGuard {
    /// State observed under the lock
    pub fn state(&self) -> EntryState {
        self.guard.state
    }

    /// The locked entry
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// Record the staged files and mark the entry `Ready`
    pub fn mark_ready(&mut self, files: Vec<PathBuf>) {
        debug_assert!(files.len() <= 2, "an entry owns at most two files");
        self.guard.files = files;
        self.guard.state = EntryState::Ready;
    }

    /// Mark the entry `Evicted`
    pub fn mark_evicted(&mut self) {
        self.guard.state = EntryState::Evicted;
    }

    /// Delete the owned files, then the staging directory if it is empty
    pub async fn delete_files(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for file in self.guard.files.drain(..) {
            debug!("Deleting cached file {}", file.display());
            match tokio::fs::remove_file(&file).await {
                Ok(()) => report.files_deleted += 1,
                Err(e) => {
                    warn!(
                        "Unable to delete local cache file {}: {}",
                        file.display(),
                        e
                    );
                    report.failures += 1;
                }
            }
        }

        // Other resources may be staged beneath this directory, so only an
        // empty directory is removed.
        if let Err(e) = tokio::fs::remove_dir(&self.entry.local_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(
                    "Leaving staging directory {} in place: {}",
                    self.entry.local_dir.display(),
                    e
                );
            }
        }

        report
    }

    /// Atomically turn the write lock into a read lock
    ///
    /// No other writer can acquire the lock in between, so the caller keeps
    /// reading exactly what it wrote.
    pub fn downgrade(self) -> EntryReadGuard {
        debug!("Downgrading write lock to read lock on {}", self.entry.key);
        EntryReadGuard {
            entry: self.entry,
            guard: self.guard.downgrade(),
        }
    }

    /// Release the write lock
    pub fn release(self) {
        debug!("Releasing write lock on {}", self.entry.key);
    }
}
