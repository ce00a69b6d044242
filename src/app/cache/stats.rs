//! Cache statistics and staging directory usage
//!
//! Counters are updated lock-free by the cache as it serves requests; a
//! [`CacheStats`] snapshot combines them with the map occupancy and a scan of
//! the staging root.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// Live counters maintained by the cache
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    evictions: AtomicU64,
    cleanup_failures: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup_failures(&self, failures: usize) {
        self.cleanup_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Staging root of this cache instance
    pub staging_root: PathBuf,
    /// When the cache was started
    pub started_at: DateTime<Utc>,
    /// Entries currently in the map
    pub entries: usize,
    /// Maximum number of entries
    pub capacity: usize,
    /// Lookups served by an existing ready entry
    pub hits: u64,
    /// Lookups that had to populate a new entry
    pub misses: u64,
    /// Successful populations
    pub fetches: u64,
    /// Failed populations
    pub fetch_failures: u64,
    /// Entries removed from the map (capacity or explicit)
    pub evictions: u64,
    /// Local files that could not be deleted during cleanup
    pub cleanup_failures: u64,
    /// Files currently present under the staging root
    pub staged_files: usize,
    /// Bytes currently present under the staging root
    pub staged_bytes: u64,
}

impl CacheStats {
    /// Snapshot the counters
    pub fn new(
        staging_root: PathBuf,
        started_at: DateTime<Utc>,
        entries: usize,
        capacity: usize,
        counters: &CacheCounters,
    ) -> Self {
        Self {
            staging_root,
            started_at,
            entries,
            capacity,
            hits: CacheCounters::load(&counters.hits),
            misses: CacheCounters::load(&counters.misses),
            fetches: CacheCounters::load(&counters.fetches),
            fetch_failures: CacheCounters::load(&counters.fetch_failures),
            evictions: CacheCounters::load(&counters.evictions),
            cleanup_failures: CacheCounters::load(&counters.cleanup_failures),
            staged_files: 0,
            staged_bytes: 0,
        }
    }

    /// Update disk usage statistics
    pub fn set_disk_stats(&mut self, staged_files: usize, staged_bytes: u64) {
        self.staged_files = staged_files;
        self.staged_bytes = staged_bytes;
    }

    /// Fraction of lookups served without fetching, as a percentage
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64 * 100.0
    }

    /// Format staged size in human-readable format
    pub fn format_staged_size(&self) -> String {
        format_bytes(self.staged_bytes)
    }
}

/// Directory scanner for staging usage
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Count files and bytes below `root` without blocking the runtime
    pub async fn scan_staging_root(root: &Path) -> (usize, u64) {
        let root = root.to_path_buf();

        tokio::task::spawn_blocking(move || Self::scan_directory_recursive(&root))
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to scan staging directory: {}", e);
                (0, 0)
            })
    }

    fn scan_directory_recursive(dir: &Path) -> (usize, u64) {
        let mut file_count = 0;
        let mut total_size = 0u64;

        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();

                if path.is_dir() {
                    let (sub_count, sub_size) = Self::scan_directory_recursive(&path);
                    file_count += sub_count;
                    total_size += sub_size;
                } else if path.is_file() {
                    file_count += 1;
                    if let Ok(metadata) = entry.metadata() {
                        total_size += metadata.len();
                    }
                }
            }
        }

        (file_count, total_size)
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
