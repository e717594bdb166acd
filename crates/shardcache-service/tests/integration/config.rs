use std::fs;
use std::time::Duration;

use shardcache_service::caching::Cache;
use shardcache_service::config::Config;

use crate::fetch;

#[tokio::test]
async fn test_cache_from_config_file() {
    shardcache_test::setup();
    let dir = shardcache_test::tempdir();
    let origin_dir = dir.path().join("origin");
    fs::create_dir(&origin_dir).unwrap();
    fs::write(origin_dir.join("hello.txt"), b"hello").unwrap();

    let config_path = dir.path().join("config.yml");
    let yaml = format!(
        "cache:\n  dir: {cache}\n  max_size: 1024000\n  survey_interval: 5m\norigin:\n  type: filesystem\n  path: {origin}\n",
        cache = dir.path().join("cache").display(),
        origin = origin_dir.display(),
    );
    fs::write(&config_path, yaml).unwrap();

    let config = Config::get(Some(&config_path)).unwrap();
    assert_eq!(config.cache.survey_interval, Duration::from_secs(300));

    let origin = config.origin.as_ref().unwrap().build().unwrap();
    let cache = Cache::with_shared_origin(config.cache, origin).unwrap();

    assert_eq!(fetch(&cache, "hello.txt").await, b"hello");
    assert!(cache.path_for(b"hello.txt").starts_with(dir.path().join("cache")));
}
