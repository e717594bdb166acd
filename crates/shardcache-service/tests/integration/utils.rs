use std::fs;
use std::path::Path;

use shardcache_service::caching::Cache;
use shardcache_service::config::CacheConfig;
use shardcache_service::origin::{FilesystemOriginConfig, OriginConfig};

pub use shardcache_test::TempDir;

/// Setup tests and create a cache in front of a filesystem origin.
///
/// This function returns the cache, and a temporary directory holding both the cache root in
/// `cache/` and the origin files in `origin/`. The directory is cleaned up when the [`TempDir`]
/// instance is dropped. Keep it as guard until the test has finished.
///
/// The `update_config` closure can modify the default configuration before the cache is created.
pub fn setup_cache(update_config: impl FnOnce(&mut CacheConfig)) -> (Cache, TempDir) {
    shardcache_test::setup();

    let dir = shardcache_test::tempdir();
    fs::create_dir(dir.path().join("origin")).unwrap();

    let mut config = CacheConfig::new(dir.path().join("cache"), 1024000);
    update_config(&mut config);

    let origin = OriginConfig::Filesystem(FilesystemOriginConfig {
        path: dir.path().join("origin"),
    })
    .build()
    .unwrap();
    let cache = Cache::with_shared_origin(config, origin).unwrap();

    (cache, dir)
}

/// Places a file with the given content in the origin directory.
pub fn put_origin_file(dir: &Path, key: &str, content: &[u8]) {
    fs::write(dir.join("origin").join(key), content).unwrap();
}

/// Fetches `key` into a new buffer.
pub async fn fetch(cache: &Cache, key: impl AsRef<[u8]>) -> Vec<u8> {
    let mut sink = Vec::new();
    let written = cache.fetch(&mut sink, key.as_ref()).await.unwrap();
    assert_eq!(written, sink.len() as u64);
    sink
}
