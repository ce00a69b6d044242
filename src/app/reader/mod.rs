//! Staged readers over paired resources
//!
//! [`Stager`] turns a logical path into a [`StagedReader`]. Object store
//! paths are staged through the [`LocalBlobCache`] and the reader holds the
//! entry's read lock until it is closed; local paths are read in place.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stage_cache::app::cache::{CacheConfig, LocalBlobCache};
//! use stage_cache::app::reader::Stager;
//! use stage_cache::app::store::{HttpObjectStore, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(LocalBlobCache::start(CacheConfig::default()).await?);
//! let store = Arc::new(HttpObjectStore::new(&StoreConfig::default())?);
//! let stager = Stager::new(Arc::clone(&cache), store);
//!
//! let mut reader = stager.open_map("s3://imagery/tiles/10").await?;
//! if let Some(value) = reader.get(b"tile-00042").await? {
//!     println!("{} bytes", value.len());
//! }
//! reader.close();
//!
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join;
use tracing::{debug, info, warn};

use crate::app::cache::{EntryReadGuard, LocalBlobCache};
use crate::app::resource::{ObjectLocation, ResourcePath, Scheme};
use crate::app::store::{delete_consistent, ConsistencyPolicy, ObjectStore};
use crate::constants::{files, layout};
use crate::errors::{ReaderError, ReaderResult, StoreResult};

pub mod decoder;
pub mod map;
pub mod sequence;

pub use decoder::{LocalDecoder, PairedFileWriter, Record, WriteSummary};
pub use map::MapDecoder;
pub use sequence::SequenceDecoder;

/// Reader scanning records in key order
pub type SequenceReader = StagedReader<SequenceDecoder>;

/// Reader looking up values by key
pub type MapReader = StagedReader<MapDecoder>;

/// Opens, checks and deletes paired resources by logical path
#[derive(Debug, Clone)]
pub struct Stager {
    cache: Arc<LocalBlobCache>,
    store: Arc<dyn ObjectStore>,
    policy: ConsistencyPolicy,
}

impl Stager {
    pub fn new(cache: Arc<LocalBlobCache>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            cache,
            store,
            policy: ConsistencyPolicy::default(),
        }
    }

    /// Use a different polling schedule for remote deletes
    pub fn with_consistency_policy(mut self, policy: ConsistencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &Arc<LocalBlobCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Polling schedule used by [`delete`](Self::delete)
    pub fn consistency_policy(&self) -> &ConsistencyPolicy {
        &self.policy
    }

    /// Open a reader for `path` with decoder `D`
    ///
    /// Object store paths are staged on first use and shared afterwards.
    /// Local paths must name an existing directory.
    ///
    /// # Errors
    ///
    /// - `ReaderError::InvalidPath` if the path cannot be qualified
    /// - `ReaderError::UnsupportedScheme` for schemes that are neither
    ///   staged nor local
    /// - `ReaderError::NotFound` for a missing local directory
    /// - `ReaderError::Cache` if staging fails
    pub async fn open<D: LocalDecoder>(&self, path: &str) -> ReaderResult<StagedReader<D>> {
        let resource = ResourcePath::parse(path)?;

        match resource.scheme() {
            Scheme::ObjectStore(_) => {
                let (index, data) = remote_parts(&resource)?;
                let local_dir = resource
                    .staging_dir(self.cache.staging_root())
                    .ok_or_else(|| ReaderError::InvalidPath {
                        path: resource.to_string(),
                        reason: "no staging location".to_string(),
                    })?;

                let store = Arc::clone(&self.store);
                let lease = self
                    .cache
                    .get_or_create(&resource.cache_key(), local_dir, move |dir| async move {
                        stage_pair(store.as_ref(), &index, &data, &dir).await
                    })
                    .await?;

                debug!("Opened staged {} reader for {}", D::FORMAT, resource);
                Ok(StagedReader::staged(resource, lease))
            }
            Scheme::Local => {
                let dir = local_dir(&resource)?;
                match tokio::fs::metadata(&dir).await {
                    Ok(metadata) if metadata.is_dir() => {}
                    Ok(_) => {
                        return Err(ReaderError::NotFound {
                            path: resource.to_string(),
                        })
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(ReaderError::NotFound {
                            path: resource.to_string(),
                        })
                    }
                    Err(e) => return Err(e.into()),
                }

                debug!("Opened local {} reader for {}", D::FORMAT, resource);
                Ok(StagedReader::local(resource, dir))
            }
            Scheme::Unsupported(scheme) => Err(ReaderError::UnsupportedScheme {
                scheme: scheme.clone(),
                path: resource.to_string(),
            }),
        }
    }

    /// Open a sequential reader
    pub async fn open_sequence(&self, path: &str) -> ReaderResult<SequenceReader> {
        self.open::<SequenceDecoder>(path).await
    }

    /// Open a random-access reader
    pub async fn open_map(&self, path: &str) -> ReaderResult<MapReader> {
        self.open::<MapDecoder>(path).await
    }

    /// Whether the resource at `path` exists
    ///
    /// Remote resources exist if either part is visible in the store.
    pub async fn exists(&self, path: &str) -> ReaderResult<bool> {
        let resource = ResourcePath::parse(path)?;
        match resource.scheme() {
            Scheme::ObjectStore(_) => {
                let (index, data) = remote_parts(&resource)?;
                if self.store.exists(&index).await? {
                    return Ok(true);
                }
                Ok(self.store.exists(&data).await?)
            }
            Scheme::Local => {
                let dir = local_dir(&resource)?;
                Ok(tokio::fs::metadata(&dir).await.is_ok())
            }
            Scheme::Unsupported(scheme) => Err(ReaderError::UnsupportedScheme {
                scheme: scheme.clone(),
                path: resource.to_string(),
            }),
        }
    }

    /// Delete the resource at `path`
    ///
    /// Remote parts are deleted and polled until the store stops reporting
    /// them, then any staged copy is dropped from the cache. Dropping the
    /// staged copy waits for its open readers, so the caller must not hold
    /// one. Local resources are removed recursively.
    pub async fn delete(&self, path: &str) -> ReaderResult<()> {
        let resource = ResourcePath::parse(path)?;
        match resource.scheme() {
            Scheme::ObjectStore(_) => {
                let (index, data) = remote_parts(&resource)?;
                for part in [&index, &data] {
                    let report = delete_consistent(self.store.as_ref(), part, &self.policy).await?;
                    debug!("Delete of {}: {:?}", part, report);
                }
                if self.cache.invalidate(&resource.cache_key()).await {
                    debug!("Dropped staged copy of {}", resource);
                }
                info!("Deleted {}", resource);
                Ok(())
            }
            Scheme::Local => {
                let dir = local_dir(&resource)?;
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {
                        info!("Deleted {}", dir.display());
                        Ok(())
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        info!("{} does not exist, nothing to delete", dir.display());
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Scheme::Unsupported(scheme) => Err(ReaderError::UnsupportedScheme {
                scheme: scheme.clone(),
                path: resource.to_string(),
            }),
        }
    }
}

fn remote_parts(resource: &ResourcePath) -> ReaderResult<(ObjectLocation, ObjectLocation)> {
    resource
        .index_location()
        .zip(resource.data_location())
        .ok_or_else(|| ReaderError::InvalidPath {
            path: resource.to_string(),
            reason: "not an object store path".to_string(),
        })
}

fn local_dir(resource: &ResourcePath) -> ReaderResult<PathBuf> {
    resource
        .local_path()
        .ok_or_else(|| ReaderError::InvalidPath {
            path: resource.to_string(),
            reason: "not a local path".to_string(),
        })
}

/// Fetch both parts of a resource into `dir`
///
/// The parts are fetched concurrently. On failure every file this call may
/// have written is removed before the first error is returned.
pub async fn stage_pair(
    store: &dyn ObjectStore,
    index: &ObjectLocation,
    data: &ObjectLocation,
    dir: &Path,
) -> StoreResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let index_path = dir.join(layout::INDEX_PART);
    let data_path = dir.join(layout::DATA_PART);

    // Both fetches run to completion so no write is still in flight when
    // partial files are removed.
    let (index_result, data_result) = join(
        store.fetch_to(index, &index_path),
        store.fetch_to(data, &data_path),
    )
    .await;

    match (index_result, data_result) {
        (Ok(index_bytes), Ok(data_bytes)) => {
            debug!(
                "Staged {} bytes of index and {} bytes of data into {}",
                index_bytes,
                data_bytes,
                dir.display()
            );
            Ok(vec![index_path, data_path])
        }
        (Err(e), _) | (_, Err(e)) => {
            for part in [&index_path, &data_path] {
                let mut temp = part.clone().into_os_string();
                temp.push(files::TEMP_FILE_SUFFIX);
                for path in [part.clone(), PathBuf::from(temp)] {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => debug!("Removed partial file {}", path.display()),
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(err) => warn!("Failed to remove {}: {}", path.display(), err),
                    }
                }
            }
            Err(e)
        }
    }
}

/// Reader over one paired resource
///
/// Holds the cache entry's read lock (for staged resources) from open until
/// [`close`](Self::close) or drop. The decoder is opened on first use.
#[derive(Debug)]
pub struct StagedReader<D: LocalDecoder> {
    path: ResourcePath,
    local_dir: PathBuf,
    lease: Option<EntryReadGuard>,
    decoder: Option<D>,
    closed: bool,
}

impl<D: LocalDecoder> StagedReader<D> {
    fn staged(path: ResourcePath, lease: EntryReadGuard) -> Self {
        Self {
            path,
            local_dir: lease.local_dir().to_path_buf(),
            lease: Some(lease),
            decoder: None,
            closed: false,
        }
    }

    fn local(path: ResourcePath, local_dir: PathBuf) -> Self {
        Self {
            path,
            local_dir,
            lease: None,
            decoder: None,
            closed: false,
        }
    }

    /// Logical path this reader was opened for
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Directory the decoder reads from
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Whether the reader still holds a staged cache entry
    pub fn is_staged(&self) -> bool {
        self.lease.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The decoder, opened on first call
    pub async fn decoder(&mut self) -> ReaderResult<&mut D> {
        if self.closed {
            return Err(ReaderError::Closed {
                path: self.path.to_string(),
            });
        }

        match self.decoder {
            Some(ref mut decoder) => Ok(decoder),
            None => {
                let decoder = D::open(&self.local_dir).await?;
                debug!("Opened {} decoder on {}", D::FORMAT, self.local_dir.display());
                Ok(self.decoder.insert(decoder))
            }
        }
    }

    /// Drop the decoder and release the cache entry
    ///
    /// Calling this more than once has no further effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.decoder = None;
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
        debug!("Closed reader for {}", self.path);
    }
}

impl StagedReader<SequenceDecoder> {
    /// Next record in key order
    pub async fn next_record(&mut self) -> ReaderResult<Option<Record>> {
        Ok(self.decoder().await?.next_record().await?)
    }
}

impl StagedReader<MapDecoder> {
    /// Value stored under `key`
    pub async fn get(&mut self, key: &[u8]) -> ReaderResult<Option<Vec<u8>>> {
        Ok(self.decoder().await?.get(key).await?)
    }
}
