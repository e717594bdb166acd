use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// An error that prevents a [`Cache`](super::Cache) from starting up.
///
/// All of these are fatal. Once a cache is running, disk problems only show up in the logs.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A shard or staging directory could not be created.
    #[error("failed to create cache directory `{}`", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The configuration has values that make no sense.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
    /// The cache was created outside of a Tokio runtime and cannot start its evictor.
    #[error("cache must be created from within a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// An error returned by [`Cache::fetch`](super::Cache::fetch).
///
/// Problems writing to or evicting from the cache directory are never surfaced here.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The origin failed to provide the content.
    ///
    /// The error is passed through untouched.
    #[error(transparent)]
    Origin(anyhow::Error),
    /// Reading the content or writing it to the sink failed after `written` bytes.
    #[error("failed to stream content after {written} bytes")]
    Stream {
        written: u64,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// The number of bytes that reached the sink before the error.
    pub fn bytes_written(&self) -> u64 {
        match self {
            Self::Origin(_) => 0,
            Self::Stream { written, .. } => *written,
        }
    }
}
