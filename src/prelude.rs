//! Prelude module for stage_cache
//!
//! Re-exports the items needed for typical usage with a single
//! `use stage_cache::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use stage_cache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cache = Arc::new(LocalBlobCache::start(CacheConfig::default()).await?);
//!     let store = Arc::new(HttpObjectStore::new(&StoreConfig::default())?);
//!     let stager = Stager::new(Arc::clone(&cache), store);
//!
//!     let mut reader = stager.open_map("s3://imagery/tiles/10").await?;
//!     let _value = reader.get(b"tile-00042").await?;
//!     reader.close();
//!
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Essential app components
pub use crate::app::{
    CacheConfig, CacheKey, CacheStats, ConsistencyPolicy, HttpObjectStore, InMemoryObjectStore,
    LocalBlobCache, MapReader, ObjectLocation, ObjectStore, Record, ResourcePath, SequenceReader,
    Stager, StoreConfig,
};

// Configuration loading
pub use crate::config::AppConfig;

// Commonly used constants
pub use crate::constants::{DATA_PART, DEFAULT_MAX_ELEMENTS, INDEX_PART};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;
