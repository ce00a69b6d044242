//! In-process object store
//!
//! Holds objects in memory and behaves like an eventually-consistent remote
//! store where needed: fetches can be delayed or made to fail, and deleted
//! objects can stay visible to `exists` for a number of checks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::app::resource::ObjectLocation;
use crate::constants::layout;
use crate::errors::{StoreError, StoreResult};

use super::ObjectStore;

/// Object store backed by a map, for tests and local demos
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectLocation, Arc<Vec<u8>>>>,
    fetch_counts: Mutex<HashMap<ObjectLocation, usize>>,
    pending_failures: Mutex<HashMap<ObjectLocation, usize>>,
    /// Deleted objects that `exists` still reports, with checks remaining
    lingering: Mutex<HashMap<ObjectLocation, u32>>,
    fetch_delay: Duration,
    delete_visibility_lag: u32,
}

impl InMemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `delay`
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Keep deleted objects visible to the next `checks` calls of `exists`
    pub fn with_delete_visibility_lag(mut self, checks: u32) -> Self {
        self.delete_visibility_lag = checks;
        self
    }

    /// Store an object
    pub async fn put(&self, location: ObjectLocation, bytes: impl Into<Vec<u8>>) {
        self.lingering.lock().await.remove(&location);
        self.objects
            .write()
            .await
            .insert(location, Arc::new(bytes.into()));
    }

    /// Store both parts of a paired resource under `base`
    pub async fn put_resource(
        &self,
        base: &ObjectLocation,
        index: impl Into<Vec<u8>>,
        data: impl Into<Vec<u8>>,
    ) {
        let part = |name: &str| {
            ObjectLocation::new(base.bucket.clone(), format!("{}/{}", base.key, name))
        };
        self.put(part(layout::INDEX_PART), index).await;
        self.put(part(layout::DATA_PART), data).await;
    }

    /// Make the next `count` fetches of `location` fail as unavailable
    pub async fn fail_next_fetches(&self, location: ObjectLocation, count: usize) {
        self.pending_failures.lock().await.insert(location, count);
    }

    /// Number of fetches attempted for `location`
    pub async fn fetch_count(&self, location: &ObjectLocation) -> usize {
        self.fetch_counts
            .lock()
            .await
            .get(location)
            .copied()
            .unwrap_or(0)
    }

    /// Number of fetches attempted across all objects
    pub async fn total_fetches(&self) -> usize {
        self.fetch_counts.lock().await.values().sum()
    }

    /// Number of objects currently stored
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn take_failure(&self, location: &ObjectLocation) -> bool {
        let mut failures = self.pending_failures.lock().await;
        match failures.get_mut(location) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn fetch_to(&self, location: &ObjectLocation, destination: &Path) -> StoreResult<u64> {
        *self
            .fetch_counts
            .lock()
            .await
            .entry(location.clone())
            .or_insert(0) += 1;

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        if self.take_failure(location).await {
            return Err(StoreError::Unavailable {
                location: location.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let bytes = self
            .objects
            .read()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                location: location.to_string(),
            })?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, bytes.as_slice()).await?;

        tracing::debug!(
            "Fetched {} ({} bytes) to {}",
            location,
            bytes.len(),
            destination.display()
        );
        Ok(bytes.len() as u64)
    }

    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool> {
        if self.objects.read().await.contains_key(location) {
            return Ok(true);
        }

        let mut lingering = self.lingering.lock().await;
        match lingering.get_mut(location) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            Some(_) => {
                lingering.remove(location);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()> {
        let removed: Vec<ObjectLocation> = {
            let mut objects = self.objects.write().await;
            let matching: Vec<ObjectLocation> = objects
                .keys()
                .filter(|candidate| location.contains(candidate))
                .cloned()
                .collect();
            for candidate in &matching {
                objects.remove(candidate);
            }
            matching
        };

        if self.delete_visibility_lag > 0 {
            let mut lingering = self.lingering.lock().await;
            for candidate in &removed {
                lingering.insert(candidate.clone(), self.delete_visibility_lag);
            }
        }

        tracing::debug!("Deleted {} object(s) under {}", removed.len(), location);
        Ok(())
    }
}
