//! Core application logic for stage_cache
//!
//! This module contains the object store clients, the local blob cache,
//! logical resource resolution and the staged readers built on top of them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stage_cache::app::{CacheConfig, HttpObjectStore, LocalBlobCache, Stager, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(LocalBlobCache::start(CacheConfig::default()).await?);
//! let store = Arc::new(HttpObjectStore::new(&StoreConfig::default())?);
//! let stager = Stager::new(Arc::clone(&cache), store);
//!
//! let mut reader = stager.open_sequence("s3://imagery/tiles/10").await?;
//! while let Some(record) = reader.next_record().await? {
//!     println!("{} byte value", record.value.len());
//! }
//! reader.close();
//!
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod reader;
pub mod resource;
pub mod store;

// Re-export main public API
pub use cache::{CacheConfig, CacheStats, LocalBlobCache};
pub use reader::{
    MapDecoder, MapReader, PairedFileWriter, Record, SequenceDecoder, SequenceReader,
    StagedReader, Stager,
};
pub use resource::{CacheKey, ObjectLocation, ResourcePath, Scheme};
pub use store::{
    ConsistencyPolicy, DeleteReport, HttpObjectStore, InMemoryObjectStore, ObjectStore,
    StoreConfig,
};
