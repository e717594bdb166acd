use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use shardcache_service::caching::{Cache, SHARD_COUNT};
use shardcache_service::config::CacheConfig;
use shardcache_service::origin::OriginStream;

use crate::fetch;

const ENTRY_SIZE: usize = 400;

#[tokio::test]
async fn test_sampled_eviction() {
    shardcache_test::setup();
    let dir = shardcache_test::tempdir();
    let fetches = Arc::new(AtomicUsize::new(0));

    let origin = {
        let fetches = Arc::clone(&fetches);
        move |_key: Vec<u8>| {
            fetches.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, anyhow::Error>(
                    Box::pin(std::io::Cursor::new(vec![b'x'; ENTRY_SIZE])) as OriginStream
                )
            }
        }
    };
    // 900 bytes per shard
    let cache = Cache::new(CacheConfig::new(dir.path(), 1024000), origin).unwrap();
    // drive the evictor by hand
    cache.shutdown().await;

    for i in 0..3000 {
        fetch(&cache, format!("key-{i}")).await;
    }

    let evictor = cache.evictor();
    let before: Vec<_> = (0..SHARD_COUNT)
        .map(|shard| evictor.survey_shard(shard).size)
        .collect();
    let total_before: u64 = before.iter().sum();
    assert_eq!(total_before, 3000 * ENTRY_SIZE as u64);

    let (fullest, _) = before
        .iter()
        .enumerate()
        .max_by_key(|(_, size)| **size)
        .unwrap();
    let survey = evictor.survey_shard(fullest as u16);
    let excess = survey.excess().expect("fullest shard is over budget");

    let stats = evictor.sample_shard(fullest as u16).unwrap();
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.names, 3000);

    let mut total_after = 0;
    for (shard, size_before) in before.iter().enumerate() {
        let size_after = evictor.survey_shard(shard as u16).size;
        // every shard lost at least the excess, or was emptied
        assert!(size_after <= size_before.saturating_sub(excess));
        total_after += size_after;
    }
    assert_eq!(total_before - total_after, stats.removed_bytes);

    // evicted entries are fetched from the origin again
    let fetches_before = fetches.load(Ordering::SeqCst);
    for i in 0..3000 {
        assert_eq!(fetch(&cache, format!("key-{i}")).await.len(), ENTRY_SIZE);
    }
    assert_eq!(
        fetches.load(Ordering::SeqCst) - fetches_before,
        stats.removed_files
    );
}

#[tokio::test]
async fn test_under_budget() {
    shardcache_test::setup();
    let dir = shardcache_test::tempdir();
    let origin = |_key: Vec<u8>| async move {
        Ok::<_, anyhow::Error>(Box::pin(std::io::Cursor::new(vec![b'x'; 10])) as OriginStream)
    };
    let cache = Cache::new(CacheConfig::new(dir.path(), 1024000), origin).unwrap();
    cache.shutdown().await;

    for i in 0..100 {
        fetch(&cache, format!("key-{i}")).await;
    }

    for shard in 0..SHARD_COUNT {
        assert!(cache.evictor().sample_shard(shard).is_none());
    }
}
