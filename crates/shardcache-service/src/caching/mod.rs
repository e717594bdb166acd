//! # Disk content cache
//!
//! The cache persists bytes fetched from a slow [`Origin`](crate::origin::Origin) to the local
//! disk, and serves all further requests for the same key from there.
//!
//! ## Layout
//!
//! Keys are opaque byte strings. They are hashed into a [`CacheKey`], which the [`ShardRouter`]
//! places into one of 1024 shard directories below the cache root. There is one flat file per
//! key, without any sidecar metadata or index. Whether a key is cached is decided by the presence
//! of its file alone.
//!
//! New entries are written into a temp file in the `tmp` staging directory first, and atomically
//! moved into their shard once the origin stream completed. A file inside of a shard is thus
//! always complete.
//!
//! ## Fetching
//!
//! [`Cache::fetch`] is the only way to read from the cache:
//!
//! - On a hit, the file is streamed to the caller without any coordination.
//! - On a miss, the caller tries to take the [`KeyLocks`] entry for the path, waiting for a bounded
//!   amount of time. The holder fetches from the origin, and tees the stream to both the caller and
//!   the staging file.
//! - Callers that could not get the lock wait for a short moment, look at the disk once more, and
//!   fetch from the origin themselves if the entry is still missing.
//!
//! The lock only serves to avoid redundant origin fetches. Under sustained contention, or when the
//! origin is very slow, the same key may still be fetched more than once.
//!
//! ## Eviction
//!
//! The [`Evictor`] keeps the total size near the configured budget. Once every survey interval it
//! measures one random shard, and if that shard is over its share of the budget, it removes the
//! excess from every shard, picking files at random.
//!
//! ## Errors
//!
//! Failing to create the cache directories is a fatal [`CacheError`]. Once the cache is running,
//! only origin failures and I/O errors on the caller's side surface as [`FetchError`]. Problems
//! writing or evicting cache files are logged, and the affected request degrades to pass-through.

mod cache_error;
mod cache_key;
mod evictor;
mod fetch;
mod fs;
mod key_locks;
mod shards;

pub use cache_error::{CacheError, FetchError};
pub use cache_key::{CacheKey, SHARD_COUNT};
pub use evictor::{Evictor, PurgeStats, Survey};
pub use fetch::Cache;
pub use fs::StagingDir;
pub use key_locks::{KeyLocks, LockToken};
pub use shards::ShardRouter;
