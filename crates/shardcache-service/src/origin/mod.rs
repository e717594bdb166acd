//! Origins provide the content of cache misses.
//!
//! An [`Origin`] turns a logical cache key into a byte stream. The cache never retries a failed
//! origin fetch, and passes its error to the caller untouched. Any retry or timeout policy is up to
//! the origin itself.
//!
//! Besides the origins configurable via [`OriginConfig`], any async closure taking the key is an
//! origin as well:
//!
//! ```
//! use shardcache_service::origin::{Origin, OriginStream};
//!
//! let origin = |key: Vec<u8>| async move {
//!     Ok::<_, anyhow::Error>(Box::pin(std::io::Cursor::new(key)) as OriginStream)
//! };
//! # fn assert_origin(_: impl Origin) {}
//! assert_origin(origin);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::io::AsyncRead;

mod filesystem;
mod http;

pub use filesystem::{FilesystemOrigin, FilesystemOriginConfig};
pub use http::{HttpOrigin, HttpOriginConfig};

/// The content of a single key, as provided by an [`Origin`].
pub type OriginStream = Pin<Box<dyn AsyncRead + Send>>;

/// The slow source of truth behind the cache.
pub trait Origin: Send + Sync + 'static {
    /// Starts fetching the content for `key`.
    ///
    /// The same key is assumed to always have the same content.
    fn fetch<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, anyhow::Result<OriginStream>>;
}

impl<F, Fut> Origin for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<OriginStream>> + Send + 'static,
{
    fn fetch<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, anyhow::Result<OriginStream>> {
        Box::pin((self)(key.to_vec()))
    }
}

/// Configuration of the origin, selected by its `type`:
///
/// ```yaml
/// origin:
///   type: http
///   base_url: https://content.example.com/files/
/// ```
///
/// ```yaml
/// origin:
///   type: filesystem
///   path: /srv/content
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OriginConfig {
    Http(HttpOriginConfig),
    Filesystem(FilesystemOriginConfig),
}

impl OriginConfig {
    /// Creates the configured origin.
    pub fn build(&self) -> anyhow::Result<Arc<dyn Origin>> {
        Ok(match self {
            Self::Http(config) => Arc::new(HttpOrigin::new(config)?),
            Self::Filesystem(config) => Arc::new(FilesystemOrigin::new(config)),
        })
    }
}
