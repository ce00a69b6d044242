//! Local blob cache for staged object store resources
//!
//! This module stages remote paired resources onto local disk once and lets
//! any number of readers share the staged copy. Staged files are deleted only
//! after every reader has released them.
//!
//! # Key Features
//!
//! - **Deduplicated population**: concurrent misses on one key fetch once
//! - **Bounded LRU**: at most `max_elements` resources are staged at a time
//! - **Reader-safe eviction**: cleanup waits on the entry's write lock
//! - **Process-unique staging root**: created on start, removed on shutdown
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`entry`] - Cache entries, lifecycle state and lock guards
//! - [`stats`] - Counters and staging usage
//! - [`manager`] - The cache itself
//!
//! # Examples
//!
//! ```rust,no_run
//! use stage_cache::app::cache::{CacheConfig, LocalBlobCache};
//! use stage_cache::app::resource::CacheKey;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = LocalBlobCache::start(CacheConfig::default()).await?;
//! let key = CacheKey::new("s3://bucket/images/test-1");
//! let dir = cache.staging_root().join("bucket/images/test-1");
//!
//! let lease = cache
//!     .get_or_create(&key, dir, |dir| async move {
//!         tokio::fs::create_dir_all(&dir).await?;
//!         let data = dir.join("data");
//!         tokio::fs::write(&data, b"records").await?;
//!         Ok(vec![data])
//!     })
//!     .await?;
//!
//! println!("Reading {}", lease.local_dir().display());
//! lease.release();
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod manager;
pub mod stats;

#[cfg(test)]
mod tests;

// Re-export main public API
pub use config::CacheConfig;
pub use entry::{CacheEntry, CleanupReport, EntryReadGuard, EntryState, EntryWriteGuard};
pub use manager::{LocalBlobCache, RemovalCause};
pub use stats::{CacheStats, format_bytes};
