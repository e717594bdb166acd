use std::fmt;

use sha1::{Digest, Sha1};

/// The number of shard directories the key space is partitioned into.
pub const SHARD_COUNT: u16 = 1024;

/// The width of one shard in the 16-bit digest prefix space.
const SHARD_WIDTH: u16 = (u16::MAX as u32 + 1).div_ceil(SHARD_COUNT as u32) as u16;

/// The on-disk identity of a logical cache key.
///
/// This is the SHA-1 digest of the opaque key bytes. The first two bytes of the digest select
/// the shard, and everything but the first byte forms the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: [u8; 20],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_path())
    }
}

impl CacheKey {
    /// Hashes the given logical key.
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        let mut hash = [0; 20];
        hash.copy_from_slice(&Sha1::digest(key.as_ref()));
        Self { hash }
    }

    /// Returns the raw digest of the key.
    pub fn digest(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Returns the index of the shard this key is stored in, in the range `0..1024`.
    pub fn shard_index(&self) -> u16 {
        u16::from_be_bytes([self.hash[0], self.hash[1]]) / SHARD_WIDTH
    }

    /// Returns the file name of this key inside of its shard.
    ///
    /// This is the hex-encoded digest without its first byte.
    pub fn file_name(&self) -> String {
        hex::encode(&self.hash[1..])
    }

    /// Returns the path of this key relative to the cache root.
    ///
    /// The relative path looks like `$shard/$filename`, for example
    /// `539/f7e437faa5a7fce15d1ddcb9eaeaea377667b8`.
    pub fn cache_path(&self) -> String {
        format!("{}/{}", self.shard_index(), self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_shard_width() {
        assert_eq!(SHARD_WIDTH, 64);
    }

    #[test]
    fn test_hashed_paths() {
        let key = CacheKey::new("a");

        assert_eq!(key.shard_index(), 539);
        assert_eq!(key.file_name(), "f7e437faa5a7fce15d1ddcb9eaeaea377667b8");
        assert_eq!(key.cache_path(), "539/f7e437faa5a7fce15d1ddcb9eaeaea377667b8");
        assert_eq!(key.to_string(), key.cache_path());

        // the same key always ends up at the same place
        assert_eq!(CacheKey::new(b"a"), key);
        assert_eq!(CacheKey::new(String::from("a")).cache_path(), key.cache_path());
    }

    #[test]
    fn test_empty_key() {
        // sha1("") = da39a3ee5e6b4b0d3255bfef95601890afd80709
        let key = CacheKey::new(b"");
        assert_eq!(key.shard_index(), (0xda39 / 64) as u16);
        assert_eq!(key.file_name(), "39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_distinct_keys() {
        let paths: HashSet<_> = (0..10_000)
            .map(|i| CacheKey::new(format!("key-{i}")).cache_path())
            .collect();
        assert_eq!(paths.len(), 10_000);
    }

    #[test]
    fn test_shard_distribution() {
        let mut buckets = vec![0usize; SHARD_COUNT as usize];
        for i in 0..(64 * SHARD_COUNT as usize) {
            let index = CacheKey::new(format!("key-{i}")).shard_index();
            buckets[index as usize] += 1;
        }

        // every bucket is hit, and none of them is wildly over-represented
        assert!(buckets.iter().all(|count| *count > 0));
        assert!(buckets.iter().all(|count| *count < 64 * 3));
    }
}
