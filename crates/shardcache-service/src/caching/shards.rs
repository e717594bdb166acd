use std::path::{Path, PathBuf};

use super::cache_key::{CacheKey, SHARD_COUNT};
use super::CacheError;

/// Places cache keys onto the file system.
///
/// The cache root contains exactly [`SHARD_COUNT`] shard directories, named by their decimal
/// index, each holding one flat file per cached key:
///
/// ```text
/// <root>/
///   0/
///   1/
///   ...
///   539/
///     f7e437faa5a7fce15d1ddcb9eaeaea377667b8
///   ...
///   1023/
/// ```
#[derive(Debug, Clone)]
pub struct ShardRouter {
    root: PathBuf,
}

impl ShardRouter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates all the shard directories below the cache root.
    ///
    /// Failing to create any one of them is fatal, there is no partially working cache.
    pub fn create_dirs(&self) -> Result<(), CacheError> {
        for index in 0..SHARD_COUNT {
            let dir = self.shard_dir(index);
            std::fs::create_dir_all(&dir)
                .map_err(|source| CacheError::CreateDir { path: dir, source })?;
        }
        Ok(())
    }

    /// Returns the directory of the shard with the given index.
    pub fn shard_dir(&self, index: u16) -> PathBuf {
        debug_assert!(index < SHARD_COUNT);
        self.root.join(index.to_string())
    }

    /// Returns the full path of the given key.
    ///
    /// This does not touch the file system.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.shard_dir(key.shard_index()).join(key.file_name())
    }

    /// Iterates over all the shard directories, in index order.
    pub fn shard_dirs(&self) -> impl Iterator<Item = (u16, PathBuf)> + '_ {
        (0..SHARD_COUNT).map(|index| (index, self.shard_dir(index)))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_path_for() {
        let router = ShardRouter::new("/tmp/c");
        let key = CacheKey::new("a");

        assert_eq!(
            router.path_for(&key),
            Path::new("/tmp/c/539/f7e437faa5a7fce15d1ddcb9eaeaea377667b8")
        );
        assert_eq!(router.path_for(&key), router.path_for(&CacheKey::new("a")));
        assert_ne!(router.path_for(&key), router.path_for(&CacheKey::new("b")));
    }

    #[test]
    fn test_create_dirs() {
        shardcache_test::setup();
        let cache_dir = shardcache_test::tempdir();
        let router = ShardRouter::new(cache_dir.path().join("cache"));

        router.create_dirs().unwrap();
        // creating them again is fine
        router.create_dirs().unwrap();

        for (index, dir) in router.shard_dirs() {
            assert!(dir.is_dir(), "shard {index} is missing");
        }
        assert_eq!(fs::read_dir(router.root()).unwrap().count(), 1024);
        assert!(!router.root().join("1024").exists());
    }

    #[test]
    fn test_create_dirs_fails() {
        shardcache_test::setup();
        let cache_dir = shardcache_test::tempdir();
        let root = cache_dir.path().join("cache");
        fs::write(&root, b"not a directory").unwrap();

        let err = ShardRouter::new(&root).create_dirs().unwrap_err();
        match err {
            CacheError::CreateDir { path, .. } => assert_eq!(path, root.join("0")),
            err => panic!("unexpected error: {err}"),
        }
    }
}
