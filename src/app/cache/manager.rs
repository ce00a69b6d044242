//! Local blob cache with deduplicated population and eviction cleanup
//!
//! [`LocalBlobCache`] maps each [`CacheKey`] to one [`CacheEntry`] whose files
//! live below a per-process staging root. The map is a bounded LRU; removing
//! an entry from it (capacity pressure or [`LocalBlobCache::invalidate`])
//! always runs the entry's cleanup, which waits for every reader to release.
//! Until that cleanup finishes the entry stays in a draining set, and a new
//! entry for the same key is only created once it has finished.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use clru::CLruCache;
use tempfile::TempDir;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::app::resource::CacheKey;
use crate::constants::cache;
use crate::errors::{CacheError, CacheResult, StoreError, StoreResult};

use super::config::CacheConfig;
use super::entry::{CacheEntry, CleanupReport, EntryReadGuard, EntryWriteGuard};
use super::stats::{CacheCounters, CacheStats, DirectoryScanner};

/// Why an entry left the map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Least-recently-used entry displaced by an insert into a full map
    Capacity,
    /// Removed through `invalidate`
    Explicit,
    /// Discarded by `shutdown`
    Shutdown,
}

/// Entries guarded by the map lock
#[derive(Debug)]
struct EntryMap {
    lru: CLruCache<CacheKey, Arc<CacheEntry>>,
    /// Removed from `lru` but not yet cleaned up; at most one per key
    draining: HashMap<CacheKey, Arc<CacheEntry>>,
}

impl EntryMap {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            lru: CLruCache::new(capacity),
            draining: HashMap::new(),
        }
    }

    /// Move `entry` from the LRU map to the draining set
    fn start_draining(&mut self, entry: &Arc<CacheEntry>) {
        self.draining
            .insert(entry.key().clone(), Arc::clone(entry));
    }
}

/// Result of resolving a key under the map lock
enum Lookup {
    /// An entry already exists; wait for its read lock
    Existing(Arc<CacheEntry>),
    /// The previous entry for the key is still being cleaned up
    Draining(Arc<CacheEntry>),
    /// This caller created the entry and must populate it
    Created {
        writer: EntryWriteGuard,
        victim: Option<Arc<CacheEntry>>,
    },
}

/// Bounded cache of locally staged resources
#[derive(Debug)]
pub struct LocalBlobCache {
    config: CacheConfig,
    capacity: NonZeroUsize,
    staging_root: PathBuf,
    /// Owns the staging root; taken and removed on shutdown
    staging_dir: Mutex<Option<TempDir>>,
    entries: Mutex<EntryMap>,
    counters: CacheCounters,
    started_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl LocalBlobCache {
    /// Start a cache instance
    ///
    /// Creates `config.base_dir` if needed and a fresh staging root inside it
    /// whose name cannot collide with another process.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidCapacity` if `max_elements` is 0 and
    /// `CacheError::DirectoryNotAccessible` if the directories cannot be
    /// created.
    pub async fn start(config: CacheConfig) -> CacheResult<Self> {
        let capacity =
            NonZeroUsize::new(config.max_elements).ok_or(CacheError::InvalidCapacity {
                capacity: config.max_elements,
            })?;

        Self::ensure_directory_exists(&config.base_dir).await?;

        let staging_dir = tempfile::Builder::new()
            .prefix(cache::STAGING_ROOT_PREFIX)
            .tempdir_in(&config.base_dir)
            .map_err(|e| {
                error!("Failed to create staging root: {}", e);
                CacheError::DirectoryNotAccessible {
                    path: config.base_dir.clone(),
                }
            })?;
        let staging_root = staging_dir.path().to_path_buf();

        info!(
            "Started local blob cache with staging root {} (capacity {})",
            staging_root.display(),
            capacity
        );

        Ok(Self {
            config,
            capacity,
            staging_root,
            staging_dir: Mutex::new(Some(staging_dir)),
            entries: Mutex::new(EntryMap::new(capacity)),
            counters: CacheCounters::default(),
            started_at: Utc::now(),
            closed: AtomicBool::new(false),
        })
    }

    async fn ensure_directory_exists(path: &Path) -> CacheResult<()> {
        if !path.exists() {
            fs::create_dir_all(path).await.map_err(|e| {
                error!("Failed to create cache directory: {}", e);
                CacheError::DirectoryNotAccessible {
                    path: path.to_path_buf(),
                }
            })?;
            debug!("Created cache directory: {}", path.display());
        }
        Ok(())
    }

    /// Get the cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directory all staged resources of this instance live under
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of entries currently in the map
    pub async fn len(&self) -> usize {
        self.entries.lock().await.lru.len()
    }

    /// Whether the map holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `key` is in the map; does not touch recency
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().await.lru.peek(key).is_some()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.is_shut_down() {
            Err(CacheError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Return a read guard on the ready entry for `key`, staging it if absent
    ///
    /// When the key is not cached, exactly one caller runs `populate` with
    /// `local_dir`; concurrent callers for the same key wait on the new
    /// entry's lock and share the result. `populate` returns the files it
    /// staged and must remove its own partial files when it fails.
    ///
    /// Inserting into a full map evicts the least-recently-used entry. Its
    /// cleanup runs here, after this caller's population, and waits for that
    /// entry's readers to release.
    ///
    /// If the key's previous entry was evicted or invalidated and still has
    /// readers, this waits for them and finishes that cleanup before staging
    /// again. A caller holding such a reader must not reopen the same key.
    ///
    /// # Errors
    ///
    /// - `CacheError::NotFound` if `populate` reports a missing object
    /// - `CacheError::FetchFailure` for any other population error; the
    ///   entry is removed so a later call fetches again
    /// - `CacheError::ShutDown` once the cache has been shut down
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &CacheKey,
        local_dir: PathBuf,
        populate: F,
    ) -> CacheResult<EntryReadGuard>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = StoreResult<Vec<PathBuf>>>,
    {
        loop {
            match self.lookup_or_insert(key, &local_dir).await? {
                Lookup::Existing(entry) => {
                    let guard = entry.acquire_read().await;
                    if guard.is_ready() {
                        self.ensure_open()?;
                        self.counters.record_hit();
                        debug!("Cache hit for {}", key);
                        return Ok(guard);
                    }

                    // Failed, abandoned, or evicted while we waited
                    debug!("Discarding stale {:?} entry for {}", guard.state(), key);
                    drop(guard);
                    self.forget(&entry).await;
                }
                Lookup::Draining(entry) => {
                    debug!("Waiting for previous entry of {} to be cleaned up", key);
                    self.drain(&entry).await;
                }
                Lookup::Created { writer, victim } => {
                    self.counters.record_miss();
                    return self.populate_entry(writer, victim, populate).await;
                }
            }
        }
    }

    async fn lookup_or_insert(&self, key: &CacheKey, local_dir: &Path) -> CacheResult<Lookup> {
        let mut entries = self.entries.lock().await;
        self.ensure_open()?;

        if let Some(entry) = entries.lru.get(key) {
            return Ok(Lookup::Existing(Arc::clone(entry)));
        }
        if let Some(entry) = entries.draining.get(key) {
            return Ok(Lookup::Draining(Arc::clone(entry)));
        }

        let entry = CacheEntry::new(key.clone(), local_dir.to_path_buf());
        // Nobody else can see the entry yet, so this does not wait
        let writer = entry.acquire_write().await;

        let victim = if entries.lru.len() >= self.capacity.get() {
            entries.lru.pop_back().map(|(_, victim)| victim)
        } else {
            None
        };
        if let Some(victim) = &victim {
            entries.start_draining(victim);
        }
        entries.lru.put(key.clone(), entry);

        Ok(Lookup::Created { writer, victim })
    }

    async fn populate_entry<F, Fut>(
        &self,
        mut writer: EntryWriteGuard,
        victim: Option<Arc<CacheEntry>>,
        populate: F,
    ) -> CacheResult<EntryReadGuard>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = StoreResult<Vec<PathBuf>>>,
    {
        let entry = Arc::clone(writer.entry());
        let start = Instant::now();
        info!(
            "Staging {} into {}",
            entry.key(),
            entry.local_dir().display()
        );

        let outcome = match populate(entry.local_dir().to_path_buf()).await {
            Ok(files) => {
                self.counters.record_fetch();
                info!(
                    "Staged {} ({} files) in {:.2?}",
                    entry.key(),
                    files.len(),
                    start.elapsed()
                );
                writer.mark_ready(files);
                Ok(writer.downgrade())
            }
            Err(source) => {
                self.counters.record_fetch_failure();
                warn!("Failed to stage {}: {}", entry.key(), source);

                writer.delete_files().await;
                writer.mark_evicted();
                writer.release();
                self.forget(&entry).await;

                let key = entry.key().to_string();
                Err(match source {
                    StoreError::NotFound { .. } => CacheError::NotFound { key },
                    source => CacheError::FetchFailure { key, source },
                })
            }
        };

        if let Some(victim) = victim {
            self.run_cleanup(victim, RemovalCause::Capacity).await;
        }

        outcome
    }

    /// Remove `entry` from the map if the map still holds that same entry
    async fn forget(&self, entry: &Arc<CacheEntry>) {
        let mut entries = self.entries.lock().await;
        let mapped = entries
            .lru
            .peek(entry.key())
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if mapped {
            entries.lru.pop(entry.key());
            debug!("Removed placeholder for {}", entry.key());
        }
    }

    async fn run_cleanup(&self, entry: Arc<CacheEntry>, cause: RemovalCause) {
        self.counters.record_eviction();
        debug!("Evicting {} ({:?}); waiting for readers", entry.key(), cause);

        let report = self.drain(&entry).await;
        info!(
            "Evicted {} ({:?}): {} files deleted, {} failures",
            entry.key(),
            cause,
            report.files_deleted,
            report.failures
        );
    }

    /// Clean up a draining entry, then drop it from the draining set
    ///
    /// Safe to call from several tasks; only the first to take the write lock
    /// deletes files.
    async fn drain(&self, entry: &Arc<CacheEntry>) -> CleanupReport {
        let report = entry.cleanup().await;
        if report.failures > 0 {
            self.counters.record_cleanup_failures(report.failures);
        }

        let mut entries = self.entries.lock().await;
        let draining = entries
            .draining
            .get(entry.key())
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if draining {
            entries.draining.remove(entry.key());
        }
        report
    }

    /// Remove `key` and delete its staged files
    ///
    /// Blocks until every reader of the entry has released. Returns whether
    /// the key was cached.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut entries = self.entries.lock().await;
            let removed = entries.lru.pop(key);
            if let Some(entry) = &removed {
                entries.start_draining(entry);
            }
            removed
        };
        match removed {
            Some(entry) => {
                self.run_cleanup(entry, RemovalCause::Explicit).await;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the cache counters and staging usage
    pub async fn stats(&self) -> CacheStats {
        let entries = self.len().await;
        let mut stats = CacheStats::new(
            self.staging_root.clone(),
            self.started_at,
            entries,
            self.capacity(),
            &self.counters,
        );
        let (files, bytes) = DirectoryScanner::scan_staging_root(&self.staging_root).await;
        stats.set_disk_stats(files, bytes);
        stats
    }

    /// Stop the cache and remove the staging root
    ///
    /// Later calls to `get_or_create` fail with `CacheError::ShutDown`. The
    /// map is cleared without waiting for readers and the staging root is
    /// removed regardless of lock state. Calling this again is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Cache already shut down");
            return;
        }

        {
            let mut entries = self.entries.lock().await;
            while let Some((key, _)) = entries.lru.pop_back() {
                debug!("Dropping {} ({:?})", key, RemovalCause::Shutdown);
            }
            entries.draining.clear();
        }

        let staging_dir = self.staging_dir.lock().await.take();

        if let Some(dir) = staging_dir {
            let root = self.staging_root.clone();
            match tokio::task::spawn_blocking(move || dir.close()).await {
                Ok(Ok(())) => info!("Removed staging root {}", root.display()),
                Ok(Err(e)) => warn!("Failed to remove staging root {}: {}", root.display(), e),
                Err(e) => warn!("Staging root cleanup task failed: {}", e),
            }
        }
    }
}
