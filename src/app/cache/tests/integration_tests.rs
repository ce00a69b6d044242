//! Integration tests for the cache module
//!
//! These tests drive [`LocalBlobCache`] from many tasks at once and check the
//! single-fetch, capacity and reader-safe eviction behaviour end to end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tempfile::TempDir;
use tokio::time::sleep;

use crate::app::cache::{CacheConfig, EntryReadGuard, EntryState, LocalBlobCache};
use crate::app::resource::CacheKey;
use crate::errors::{CacheError, CacheResult, StoreError, StoreResult};

struct Harness {
    _dir: TempDir,
    cache: Arc<LocalBlobCache>,
    populations: Arc<AtomicUsize>,
}

impl Harness {
    async fn new(max_elements: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let config =
            CacheConfig::with_base_dir(dir.path().to_path_buf()).with_max_elements(max_elements);
        Self {
            _dir: dir,
            cache: Arc::new(LocalBlobCache::start(config).await.unwrap()),
            populations: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn local_dir(&self, name: &str) -> PathBuf {
        self.cache.staging_root().join("bucket").join(name)
    }

    /// Open `name`, staging an index and data file after `delay`
    async fn open(&self, name: &str, delay: Duration) -> CacheResult<EntryReadGuard> {
        let key = CacheKey::new(format!("s3://bucket/{}", name));
        let populations = Arc::clone(&self.populations);
        let content = name.to_string();
        self.cache
            .get_or_create(&key, self.local_dir(name), move |dir| async move {
                populations.fetch_add(1, Ordering::SeqCst);
                sleep(delay).await;
                stage(dir, &content).await
            })
            .await
    }

    /// Open `name` with a populate step that fails after `delay`
    async fn open_failing(&self, name: &str, delay: Duration) -> CacheResult<EntryReadGuard> {
        let key = CacheKey::new(format!("s3://bucket/{}", name));
        let populations = Arc::clone(&self.populations);
        self.cache
            .get_or_create(&key, self.local_dir(name), move |_| async move {
                populations.fetch_add(1, Ordering::SeqCst);
                sleep(delay).await;
                Err::<Vec<PathBuf>, _>(StoreError::Unavailable {
                    location: "s3://bucket/x/index".to_string(),
                    reason: "connection reset".to_string(),
                })
            })
            .await
    }

    fn populations(&self) -> usize {
        self.populations.load(Ordering::SeqCst)
    }
}

async fn stage(dir: PathBuf, content: &str) -> StoreResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(&dir).await?;
    let index = dir.join("index");
    let data = dir.join("data");
    tokio::fs::write(&index, format!("index:{}", content)).await?;
    tokio::fs::write(&data, format!("data:{}", content)).await?;
    Ok(vec![index, data])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_populate_once() {
    let harness = Arc::new(Harness::new(10).await);

    let opens = (0..16).map(|_| {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            let guard = harness
                .open("shared", Duration::from_millis(100))
                .await
                .unwrap();
            let data = tokio::fs::read_to_string(guard.local_dir().join("data"))
                .await
                .unwrap();
            guard.release();
            data
        })
    });

    let contents: Vec<String> = join_all(opens)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    assert_eq!(harness.populations(), 1);
    assert!(contents.iter().all(|c| c == "data:shared"));

    let stats = harness.cache.stats().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 15);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_used() {
    let harness = Harness::new(2).await;

    for name in ["a", "b", "c"] {
        harness.open(name, Duration::ZERO).await.unwrap().release();
        assert!(harness.cache.len().await <= 2);
    }

    let key = |name: &str| CacheKey::new(format!("s3://bucket/{}", name));
    assert!(!harness.cache.contains(&key("a")).await);
    assert!(harness.cache.contains(&key("b")).await);
    assert!(harness.cache.contains(&key("c")).await);
    assert!(!harness.local_dir("a").exists());
    assert!(harness.local_dir("b").join("data").exists());
    assert_eq!(harness.populations(), 3);

    // Reopening A fetches again and displaces B
    harness.open("a", Duration::ZERO).await.unwrap().release();
    assert_eq!(harness.populations(), 4);
    assert!(!harness.cache.contains(&key("b")).await);
    assert_eq!(harness.cache.len().await, 2);
    assert_eq!(harness.cache.stats().await.evictions, 2);
}

#[tokio::test]
async fn test_recent_use_protects_from_eviction() {
    let harness = Harness::new(2).await;

    harness.open("a", Duration::ZERO).await.unwrap().release();
    harness.open("b", Duration::ZERO).await.unwrap().release();
    // Touch A so that B becomes least recently used
    harness.open("a", Duration::ZERO).await.unwrap().release();
    harness.open("c", Duration::ZERO).await.unwrap().release();

    assert!(harness.local_dir("a").exists());
    assert!(!harness.local_dir("b").exists());
    assert_eq!(harness.populations(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eviction_waits_for_active_reader() {
    let harness = Arc::new(Harness::new(1).await);

    let reader = harness.open("a", Duration::ZERO).await.unwrap();
    let staged: Vec<PathBuf> = reader.files().to_vec();

    let evicting = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .open("b", Duration::ZERO)
                .await
                .map(|guard| guard.release())
        })
    };

    sleep(Duration::from_millis(200)).await;
    assert!(!evicting.is_finished(), "eviction must wait for the reader");
    assert!(staged.iter().all(|f| f.exists()));

    let entry = Arc::clone(reader.entry());
    reader.release();
    evicting.await.unwrap().unwrap();

    assert!(staged.iter().all(|f| !f.exists()));
    assert_eq!(entry.acquire_read().await.state(), EntryState::Evicted);
}

#[tokio::test]
async fn test_failed_population_is_not_cached() {
    let harness = Harness::new(4).await;

    let result = harness.open_failing("x", Duration::ZERO).await;
    match result {
        Err(CacheError::FetchFailure { key, source }) => {
            assert_eq!(key, "s3://bucket/x");
            assert!(matches!(source, StoreError::Unavailable { .. }));
        }
        other => panic!("expected FetchFailure, got {:?}", other.map(|_| ())),
    }
    assert!(!harness.cache.contains(&CacheKey::new("s3://bucket/x")).await);
    assert!(!harness.local_dir("x").exists());

    let guard = harness.open("x", Duration::ZERO).await.unwrap();
    assert!(guard.is_ready());
    assert_eq!(harness.populations(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiter_retries_after_failed_population() {
    let harness = Arc::new(Harness::new(4).await);

    let failing = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .open_failing("x", Duration::from_millis(200))
                .await
                .map(|guard| guard.release())
        })
    };

    // Let the failing populator publish its placeholder first
    sleep(Duration::from_millis(50)).await;
    let waiter = harness.open("x", Duration::ZERO).await.unwrap();

    assert!(failing.await.unwrap().is_err());
    assert!(waiter.is_ready());
    assert_eq!(harness.populations(), 2);
}

#[tokio::test]
async fn test_abandoned_population_is_replaced() {
    let harness = Harness::new(4).await;

    // Cancel a population halfway through; its placeholder stays Pending
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), harness.open("x", Duration::from_secs(60)))
            .await;
    assert!(abandoned.is_err());

    let guard = harness.open("x", Duration::ZERO).await.unwrap();
    assert!(guard.is_ready());
    assert_eq!(harness.populations(), 2);
}

#[tokio::test]
async fn test_victim_of_cancelled_population_is_drained_on_reopen() {
    let harness = Harness::new(1).await;
    drop(harness.open("a", Duration::ZERO).await.unwrap());

    // Opening b pops a, then the population is cancelled before a is cleaned
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), harness.open("b", Duration::from_secs(60)))
            .await;
    assert!(abandoned.is_err());
    assert!(!harness.cache.contains(&CacheKey::new("s3://bucket/a")).await);

    let guard = harness.open("a", Duration::ZERO).await.unwrap();
    assert!(guard.is_ready());
    assert!(guard.files().iter().all(|file| file.exists()));
    assert_eq!(harness.populations(), 3);
    assert_eq!(harness.cache.len().await, 1);
}

#[tokio::test]
async fn test_invalidate_waits_for_reader() {
    let harness = Arc::new(Harness::new(4).await);
    let reader = harness.open("a", Duration::ZERO).await.unwrap();
    let key = CacheKey::new("s3://bucket/a");

    let invalidating = {
        let harness = Arc::clone(&harness);
        let key = key.clone();
        tokio::spawn(async move { harness.cache.invalidate(&key).await })
    };

    sleep(Duration::from_millis(50)).await;
    assert!(!invalidating.is_finished());
    assert!(!harness.cache.contains(&key).await);

    drop(reader);
    assert!(invalidating.await.unwrap());
    assert!(!harness.local_dir("a").exists());
}
