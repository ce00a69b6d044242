//! Object store access
//!
//! The [`ObjectStore`] trait is the only way the rest of the crate talks to
//! remote storage. It is deliberately small: fetch an object to a local
//! file, check existence, delete.
//!
//! - [`config`] - HTTP client configuration
//! - [`http`] - Path-style HTTP implementation
//! - [`memory`] - In-process implementation
//! - [`consistency`] - Delete with bounded existence polling

use std::path::Path;

use async_trait::async_trait;

use crate::app::resource::ObjectLocation;
use crate::errors::StoreResult;

pub mod config;
pub mod consistency;
pub mod http;
pub mod memory;

pub use config::StoreConfig;
pub use consistency::{delete_consistent, ConsistencyPolicy, DeleteReport, WaitPhase};
pub use http::HttpObjectStore;
pub use memory::InMemoryObjectStore;

/// Remote storage holding immutable objects
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Download `location` to `destination`, returning the bytes written
    ///
    /// Missing parent directories are created. A missing object is reported
    /// as `StoreError::NotFound`.
    async fn fetch_to(&self, location: &ObjectLocation, destination: &Path) -> StoreResult<u64>;

    /// Whether the store currently reports `location`
    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool>;

    /// Request deletion of `location`; the object may stay visible for a while
    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()>;
}
