//! Helpers for testing the cache service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, the cache root is deleted underneath
//!    a running cache, and every following write silently degrades to pass-through. To avoid
//!    this, assign it to a variable in the test function
//!    (e.g. `let cache_dir = shardcache_test::tempdir()`).
//!
//!  - Use [`write_files`] to seed a shard with entries of a known size when testing eviction.

use std::fs;
use std::path::Path;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `shardcache_service` crate and
///    mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("shardcache_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Writes `count` files of `size` bytes each into `dir`.
///
/// Files are named `entry-0`, `entry-1`, and so on. The directory has to exist.
pub fn write_files(dir: impl AsRef<Path>, count: usize, size: usize) {
    let dir = dir.as_ref();
    for i in 0..count {
        fs::write(dir.join(format!("entry-{i}")), vec![b'x'; size]).unwrap();
    }
}

/// Sums up the sizes of all the regular files directly inside of `dir`.
pub fn dir_size(dir: impl AsRef<Path>) -> u64 {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().metadata().unwrap())
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
        .sum()
}

/// Counts the entries directly inside of `dir`.
pub fn file_count(dir: impl AsRef<Path>) -> usize {
    fs::read_dir(dir).unwrap().count()
}
