use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use shardcache_service::caching::{Cache, CacheKey, FetchError};
use shardcache_service::config::CacheConfig;
use shardcache_service::origin::OriginStream;

use crate::{fetch, put_origin_file, setup_cache};

#[tokio::test]
async fn test_hello() {
    let (cache, dir) = setup_cache(|_| {});
    put_origin_file(dir.path(), "a", b"hello");

    assert_eq!(fetch(&cache, "a").await, b"hello");

    let path = dir
        .path()
        .join("cache/539/f7e437faa5a7fce15d1ddcb9eaeaea377667b8");
    assert_eq!(cache.path_for(b"a"), path);
    assert_eq!(fs::read(&path).unwrap(), b"hello");

    // the origin is not consulted again
    fs::remove_file(dir.path().join("origin/a")).unwrap();
    assert_eq!(fetch(&cache, "a").await, b"hello");
}

#[tokio::test]
async fn test_origin_down() {
    shardcache_test::setup();
    let dir = shardcache_test::tempdir();
    let fetches = Arc::new(AtomicUsize::new(0));

    let origin = {
        let fetches = Arc::clone(&fetches);
        move |_key: Vec<u8>| {
            fetches.fetch_add(1, Ordering::SeqCst);
            async move { Err::<OriginStream, _>(anyhow::anyhow!("origin-down")) }
        }
    };
    let cache = Cache::new(CacheConfig::new(dir.path(), 1024000), origin).unwrap();

    let mut sink = Vec::new();
    let err = cache.fetch(&mut sink, b"b").await.unwrap_err();

    assert!(matches!(err, FetchError::Origin(_)));
    assert_eq!(err.to_string(), "origin-down");
    assert_eq!(err.bytes_written(), 0);
    assert!(!cache.path_for(b"b").exists());
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_origin_file() {
    let (cache, dir) = setup_cache(|_| {});

    let mut sink = Vec::new();
    let err = cache.fetch(&mut sink, b"missing").await.unwrap_err();
    assert!(err.to_string().contains("not found"));

    // once the origin has it, it is served and cached
    put_origin_file(dir.path(), "missing", b"found");
    assert_eq!(fetch(&cache, "missing").await, b"found");
    assert!(cache.path_for(b"missing").exists());
}

#[tokio::test]
async fn test_many_keys() {
    let (cache, dir) = setup_cache(|_| {});
    for i in 0..50 {
        put_origin_file(dir.path(), &format!("key-{i}"), format!("content {i}").as_bytes());
    }

    let results = join_all((0..50).map(|i| {
        let cache = cache.clone();
        async move { fetch(&cache, format!("key-{i}")).await }
    }))
    .await;

    for (i, content) in results.into_iter().enumerate() {
        assert_eq!(content, format!("content {i}").as_bytes());

        let key = CacheKey::new(format!("key-{i}"));
        let path = dir.path().join("cache").join(key.cache_path());
        assert_eq!(fs::read(path).unwrap(), content);
    }
}

#[tokio::test]
async fn test_large_content() {
    let (cache, dir) = setup_cache(|_| {});
    // larger than a single copy buffer
    let content: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    put_origin_file(dir.path(), "large", &content);

    assert_eq!(fetch(&cache, "large").await, content);
    assert_eq!(fs::read(cache.path_for(b"large")).unwrap(), content);
    assert_eq!(fetch(&cache, "large").await, content);
}
