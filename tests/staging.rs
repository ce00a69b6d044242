//! End-to-end staging through the cache with an in-memory object store

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Fixture;
use stage_cache::app::resource::ResourcePath;
use stage_cache::errors::{CacheError, ReaderError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_fetch_each_part_once() {
    let fixture = Arc::new(Fixture::with_fetch_delay(4, Duration::from_millis(50)).await);
    let base = fixture.upload("imagery", "tiles/10", 40).await;

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let fixture = Arc::clone(&fixture);
        handles.push(tokio::spawn(async move {
            let mut reader = fixture.stager.open_map("s3://imagery/tiles/10").await.unwrap();
            let key = format!("key-{:04}", i * 2);
            let value = reader.get(key.as_bytes()).await.unwrap();
            reader.close();
            value
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let value = handle.await.unwrap();
        assert_eq!(value, Some(format!("value-{:04}", i * 2).into_bytes()));
    }

    assert_eq!(fixture.store.fetch_count(&Fixture::part(&base, "index")).await, 1);
    assert_eq!(fixture.store.fetch_count(&Fixture::part(&base, "data")).await, 1);

    let stats = fixture.cache.stats().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.fetches, 1);
}

#[tokio::test]
async fn capacity_two_evicts_least_recently_used() {
    let fixture = Fixture::new(2).await;
    for name in ["a", "b", "c"] {
        fixture.upload("bucket", name, 5).await;
    }

    let mut dirs = Vec::new();
    for name in ["a", "b", "c"] {
        let mut reader = fixture
            .stager
            .open_sequence(&format!("s3://bucket/{}", name))
            .await
            .unwrap();
        assert!(reader.next_record().await.unwrap().is_some());
        dirs.push(reader.local_dir().to_path_buf());
        reader.close();
    }

    assert_eq!(fixture.cache.len().await, 2);
    assert!(!dirs[0].exists(), "a should have been evicted");
    assert!(dirs[1].join("data").exists());
    assert!(dirs[2].join("data").exists());

    // Re-opening a fetches it again and pushes b out
    let reader = fixture.stager.open_sequence("s3://bucket/a").await.unwrap();
    drop(reader);
    assert_eq!(fixture.store.total_fetches().await, 8);
    assert!(!dirs[1].exists(), "b should have been evicted");
    assert_eq!(fixture.cache.stats().await.evictions, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_waits_for_open_reader() {
    let fixture = Arc::new(Fixture::new(1).await);
    fixture.upload("bucket", "held", 3).await;
    fixture.upload("bucket", "next", 3).await;

    let mut held = fixture.stager.open_sequence("s3://bucket/held").await.unwrap();
    let held_dir = held.local_dir().to_path_buf();

    let opener = {
        let fixture = Arc::clone(&fixture);
        tokio::spawn(async move {
            let mut reader = fixture.stager.open_sequence("s3://bucket/next").await.unwrap();
            reader.close();
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!opener.is_finished(), "eviction must wait for the reader");
    assert!(held_dir.join("data").exists());

    // The held reader still works while its entry is being evicted
    let record = held.next_record().await.unwrap().unwrap();
    assert_eq!(record.key, b"key-0000");

    held.close();
    tokio::time::timeout(Duration::from_secs(5), opener)
        .await
        .expect("opener should finish once the reader closes")
        .unwrap();
    assert!(!held_dir.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reopen_waits_for_blocked_invalidation() {
    let fixture = Arc::new(Fixture::new(2).await);
    let base = fixture.upload("bucket", "a", 3).await;
    let key = ResourcePath::parse("s3://bucket/a").unwrap().cache_key();

    let mut held = fixture.stager.open_sequence("s3://bucket/a").await.unwrap();
    let dir = held.local_dir().to_path_buf();

    let invalidation = {
        let fixture = Arc::clone(&fixture);
        let key = key.clone();
        tokio::spawn(async move { fixture.cache.invalidate(&key).await })
    };
    while fixture.cache.contains(&key).await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let reopen = {
        let fixture = Arc::clone(&fixture);
        tokio::spawn(async move { fixture.stager.open_sequence("s3://bucket/a").await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!reopen.is_finished(), "reopen must wait for the old entry's cleanup");
    assert!(!invalidation.is_finished());
    assert_eq!(held.next_record().await.unwrap().unwrap().key, b"key-0000");

    held.close();
    assert!(tokio::time::timeout(Duration::from_secs(5), invalidation)
        .await
        .expect("invalidation should finish once the reader closes")
        .unwrap());
    let mut reopened = tokio::time::timeout(Duration::from_secs(5), reopen)
        .await
        .expect("reopen should finish once the old entry is cleaned up")
        .unwrap()
        .unwrap();

    // The new entry staged fresh files that the old cleanup did not remove
    assert_eq!(reopened.local_dir(), dir.as_path());
    assert!(dir.join("index").exists());
    assert!(dir.join("data").exists());
    assert_eq!(reopened.next_record().await.unwrap().unwrap().key, b"key-0000");
    reopened.close();

    assert_eq!(fixture.cache.len().await, 1);
    assert_eq!(fixture.store.fetch_count(&Fixture::part(&base, "data")).await, 2);
}

#[tokio::test]
async fn scheme_aliases_share_one_entry() {
    let fixture = Fixture::new(4).await;
    let base = fixture.upload("bucket", "tiles/10", 5).await;

    let mut first = fixture.stager.open_sequence("s3://bucket/tiles/10").await.unwrap();
    let mut aliased = fixture.stager.open_sequence("s3a://bucket/tiles/10").await.unwrap();
    assert_eq!(first.local_dir(), aliased.local_dir());
    assert_eq!(aliased.path().to_string(), "s3://bucket/tiles/10");

    let mut native = fixture.stager.open_sequence("s3n://bucket/tiles/10/").await.unwrap();
    assert_eq!(native.next_record().await.unwrap().unwrap().key, b"key-0000");
    for reader in [&mut first, &mut aliased, &mut native] {
        reader.close();
    }

    assert_eq!(fixture.store.fetch_count(&Fixture::part(&base, "index")).await, 1);
    assert_eq!(fixture.store.fetch_count(&Fixture::part(&base, "data")).await, 1);
    assert_eq!(fixture.cache.len().await, 1);
    let stats = fixture.cache.stats().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
}

#[tokio::test]
async fn double_close_is_harmless() {
    let fixture = Fixture::new(2).await;
    fixture.upload("bucket", "a", 2).await;

    let mut reader = fixture.stager.open_map("s3://bucket/a").await.unwrap();
    reader.close();
    reader.close();
    assert!(reader.is_closed());
    assert!(matches!(
        reader.get(b"key-0000").await,
        Err(ReaderError::Closed { .. })
    ));

    // The entry is still cached and can be invalidated without blocking
    assert!(tokio::time::timeout(
        Duration::from_secs(5),
        fixture.stager.delete("s3://bucket/a")
    )
    .await
    .unwrap()
    .is_ok());
    assert!(fixture.cache.is_empty().await);
}

#[tokio::test]
async fn transient_failure_is_not_cached() {
    let fixture = Fixture::new(2).await;
    let base = fixture.upload("bucket", "flaky", 3).await;
    let index = Fixture::part(&base, "index");
    fixture.store.fail_next_fetches(index.clone(), 1).await;

    let first = fixture.stager.open_sequence("s3://bucket/flaky").await;
    assert!(matches!(
        first,
        Err(ReaderError::Cache(CacheError::FetchFailure { .. }))
    ));
    assert!(fixture.cache.is_empty().await);

    let mut reader = fixture.stager.open_sequence("s3://bucket/flaky").await.unwrap();
    assert!(reader.next_record().await.unwrap().is_some());
    reader.close();

    assert_eq!(fixture.store.fetch_count(&index).await, 2);
    let stats = fixture.cache.stats().await;
    assert_eq!(stats.fetch_failures, 1);
    assert_eq!(stats.fetches, 1);
}

#[tokio::test]
async fn missing_resource_is_not_found() {
    let fixture = Fixture::new(2).await;

    let result = fixture.stager.open_map("s3://bucket/missing").await;
    assert!(matches!(
        result,
        Err(ReaderError::Cache(CacheError::NotFound { .. }))
    ));
    assert!(fixture.cache.is_empty().await);
    assert!(!fixture.stager.exists("s3://bucket/missing").await.unwrap());
}

#[tokio::test]
async fn shutdown_removes_staging_root() {
    let fixture = Fixture::new(2).await;
    fixture.upload("bucket", "a", 2).await;

    let reader = fixture.stager.open_sequence("s3://bucket/a").await.unwrap();
    let root = fixture.cache.staging_root().to_path_buf();
    assert!(reader.local_dir().starts_with(&root));
    drop(reader);

    fixture.cache.shutdown().await;
    assert!(!root.exists());
    assert!(matches!(
        fixture.stager.open_sequence("s3://bucket/a").await,
        Err(ReaderError::Cache(CacheError::ShutDown))
    ));
}
