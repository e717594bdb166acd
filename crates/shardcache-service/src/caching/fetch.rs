use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::{NamedTempFile, TempPath};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::origin::{Origin, OriginStream};
use crate::utils::futures::CallOnDrop;

use super::cache_key::CacheKey;
use super::evictor::Evictor;
use super::fs::{STALE_STAGING_AGE, StagingDir, persist_tempfile};
use super::key_locks::KeyLocks;
use super::shards::ShardRouter;
use super::{CacheError, FetchError};

/// The size of the chunks copied from the origin or a cache file to the caller.
const BUFFER_SIZE: usize = 64 * 1024;

/// A disk cache in front of an [`Origin`].
///
/// This is a cheap handle that can be cloned and shared between tasks. The periodic evictor runs
/// until [`shutdown`](Self::shutdown) is called, or the last handle is dropped.
#[derive(Clone, Debug)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    router: ShardRouter,
    staging: StagingDir,
    locks: Arc<KeyLocks>,
    origin: Arc<dyn Origin>,
    evictor: Arc<Evictor>,
    shutdown: CancellationToken,
    evictor_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CacheInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("locks", &self.locks)
            .field("evictor", &self.evictor)
            .finish_non_exhaustive()
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Cache {
    /// Creates a cache in the configured directory, fetching misses from `origin`.
    ///
    /// This creates all the shard directories, removes stale files left in the staging directory
    /// by a crash, and starts the periodic evictor on the current Tokio runtime.
    pub fn new(config: CacheConfig, origin: impl Origin) -> Result<Self, CacheError> {
        Self::with_shared_origin(config, Arc::new(origin))
    }

    /// Like [`new`](Self::new), for an origin that is already shared.
    pub fn with_shared_origin(
        config: CacheConfig,
        origin: Arc<dyn Origin>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        // the evictor needs somewhere to run
        tokio::runtime::Handle::try_current()?;

        let router = ShardRouter::new(&config.dir);
        router.create_dirs()?;
        let staging = StagingDir::new(router.root());
        staging.clear_stale(STALE_STAGING_AGE)?;

        let evictor = Arc::new(Evictor::new(
            router.clone(),
            config.max_size,
            config.eviction_factor,
        ));
        let shutdown = CancellationToken::new();
        let evictor_task = Arc::clone(&evictor).spawn(config.survey_interval, shutdown.clone());

        tracing::info!(
            max_size = config.max_size,
            budget = evictor.shard_budget(),
            "Cache initialized in `{}`",
            router.root().display()
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                router,
                staging,
                locks: Arc::new(KeyLocks::new()),
                origin,
                evictor,
                shutdown,
                evictor_task: Mutex::new(Some(evictor_task)),
            }),
        })
    }

    /// Serves the content of `key` into `sink`, returning the number of bytes written.
    ///
    /// Entries on disk are served directly. On a miss, the content is fetched from the origin,
    /// and written to the cache while it is streamed to `sink`.
    ///
    /// Errors are either the origin's error, or an I/O error while streaming to `sink`. In the
    /// latter case, `sink` may have received part of the content already. Failures to write the
    /// cache entry are logged but do not fail the request.
    pub async fn fetch<W>(&self, sink: &mut W, key: &[u8]) -> Result<u64, FetchError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let inner = &*self.inner;
        let path = inner.router.path_for(&CacheKey::new(key));

        if let Some(written) = serve_cached(&path, sink).await? {
            return Ok(written);
        }

        let _unlock = match inner.locks.try_lock(&path, inner.config.lock_timeout).await {
            Some(token) => {
                let unlock = CallOnDrop::new({
                    let locks = Arc::clone(&inner.locks);
                    let path = path.clone();
                    move || locks.unlock(&path, token)
                });

                // whoever held the lock before us has most likely written the entry
                if let Some(written) = serve_cached(&path, sink).await? {
                    return Ok(written);
                }
                Some(unlock)
            }
            None => {
                tokio::time::sleep(inner.config.fallback_delay).await;
                if let Some(written) = serve_cached(&path, sink).await? {
                    return Ok(written);
                }
                tracing::debug!(
                    path = %path.display(),
                    "Key is still missing after waiting, fetching without lock"
                );
                None
            }
        };

        let stream = inner.origin.fetch(key).await.map_err(FetchError::Origin)?;

        let staged = match inner.staging.tempfile() {
            Ok(temp_file) => Some(StagedEntry::new(temp_file)),
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "Failed to stage cache entry, serving without caching",
                );
                None
            }
        };

        write_through(stream, sink, staged, &path).await
    }

    /// Stops the periodic evictor, and waits for it to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let task = self
            .inner
            .evictor_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    "Cache evictor failed"
                );
            }
        }
    }

    /// Returns the path the entry for `key` is stored at.
    pub fn path_for(&self, key: &[u8]) -> PathBuf {
        self.inner.router.path_for(&CacheKey::new(key))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &ShardRouter {
        &self.inner.router
    }

    pub fn evictor(&self) -> &Evictor {
        &self.inner.evictor
    }
}

/// Streams the cache file at `path` into `sink`, if it exists.
///
/// Files that cannot be opened count as a miss.
async fn serve_cached<W>(path: &Path, sink: &mut W) -> Result<Option<u64>, FetchError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %path.display(),
                "Failed to open cache file",
            );
            return Ok(None);
        }
    };

    tracing::trace!(path = %path.display(), "Serving from cache");
    let mut written = 0;
    let mut buf = vec![0; BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|source| FetchError::Stream { written, source })?;
        if read == 0 {
            break;
        }
        sink.write_all(&buf[..read])
            .await
            .map_err(|source| FetchError::Stream { written, source })?;
        written += read as u64;
    }
    sink.flush()
        .await
        .map_err(|source| FetchError::Stream { written, source })?;

    Ok(Some(written))
}

/// Copies `stream` into `sink`, and into the staged cache entry if there is one.
///
/// The entry is only moved into the cache once the stream was copied completely.
async fn write_through<W>(
    mut stream: OriginStream,
    sink: &mut W,
    mut staged: Option<StagedEntry>,
    cache_path: &Path,
) -> Result<u64, FetchError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    let mut buf = vec![0; BUFFER_SIZE];
    loop {
        let read = stream
            .read(&mut buf)
            .await
            .map_err(|source| FetchError::Stream { written, source })?;
        if read == 0 {
            break;
        }
        let chunk = &buf[..read];

        sink.write_all(chunk)
            .await
            .map_err(|source| FetchError::Stream { written, source })?;
        written += read as u64;

        if let Some(entry) = staged.as_mut() {
            if let Err(e) = entry.file.write_all(chunk).await {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %cache_path.display(),
                    "Failed to write cache entry, serving without caching",
                );
                staged = None;
            }
        }
    }
    sink.flush()
        .await
        .map_err(|source| FetchError::Stream { written, source })?;

    if let Some(entry) = staged {
        match entry.persist(cache_path).await {
            Ok(()) => tracing::debug!(
                size = written,
                path = %cache_path.display(),
                "Wrote cache entry"
            ),
            Err(e) => tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %cache_path.display(),
                "Failed to write cache entry",
            ),
        }
    }

    Ok(written)
}

/// A cache entry being written in the staging directory.
///
/// The temp file is deleted when this is dropped without persisting it.
struct StagedEntry {
    file: File,
    path: TempPath,
}

impl StagedEntry {
    fn new(temp_file: NamedTempFile) -> Self {
        let (file, path) = temp_file.into_parts();
        Self {
            file: File::from_std(file),
            path,
        }
    }

    async fn persist(mut self, cache_path: &Path) -> io::Result<()> {
        self.file.flush().await?;
        let file = self.file.into_std().await;
        persist_tempfile(NamedTempFile::from_parts(file, self.path), cache_path)
    }
}

