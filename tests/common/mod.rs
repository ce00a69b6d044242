//! Shared fixtures for stage_cache integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stage_cache::app::cache::{CacheConfig, LocalBlobCache};
use stage_cache::app::reader::{PairedFileWriter, Stager};
use stage_cache::app::resource::ObjectLocation;
use stage_cache::app::store::{InMemoryObjectStore, ObjectStore};
use tempfile::TempDir;

/// A stager over an in-memory store, with its cache and temp directory
pub struct Fixture {
    pub temp_dir: TempDir,
    pub cache: Arc<LocalBlobCache>,
    pub store: Arc<InMemoryObjectStore>,
    pub stager: Stager,
}

impl Fixture {
    pub async fn new(capacity: usize) -> Self {
        Self::with_store(capacity, InMemoryObjectStore::new()).await
    }

    pub async fn with_fetch_delay(capacity: usize, delay: Duration) -> Self {
        Self::with_store(capacity, InMemoryObjectStore::new().with_fetch_delay(delay)).await
    }

    pub async fn with_store(capacity: usize, store: InMemoryObjectStore) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::with_base_dir(temp_dir.path().join("staging"))
            .with_max_elements(capacity);
        let cache = Arc::new(LocalBlobCache::start(config).await.unwrap());
        let store = Arc::new(store);
        let stager = Stager::new(Arc::clone(&cache), Arc::clone(&store) as Arc<dyn ObjectStore>);
        Self {
            temp_dir,
            cache,
            store,
            stager,
        }
    }

    /// Upload a resource of `count` records `key-NNNN -> value-NNNN` at `bucket/key`
    pub async fn upload(&self, bucket: &str, key: &str, count: u32) -> ObjectLocation {
        let (index, data) = encode_records(count).await;
        let base = ObjectLocation::new(bucket, key);
        self.store.put_resource(&base, index, data).await;
        base
    }

    pub fn part(base: &ObjectLocation, name: &str) -> ObjectLocation {
        ObjectLocation::new(base.bucket.clone(), format!("{}/{}", base.key, name))
    }
}

/// Encode `count` records and return the index and data part bytes
pub async fn encode_records(count: u32) -> (Vec<u8>, Vec<u8>) {
    let dir = TempDir::new().unwrap();
    let mut writer = PairedFileWriter::create(dir.path(), 4).await.unwrap();
    for i in 0..count {
        writer
            .append(
                format!("key-{:04}", i).as_bytes(),
                format!("value-{:04}", i).as_bytes(),
            )
            .await
            .unwrap();
    }
    writer.finish().await.unwrap();

    let index = tokio::fs::read(dir.path().join("index")).await.unwrap();
    let data = tokio::fs::read(dir.path().join("data")).await.unwrap();
    (index, data)
}
