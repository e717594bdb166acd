use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;

use super::CacheError;

/// The fs operations below can race with the evictor or an operator wiping the cache, so they
/// recreate missing directories and retry this many times.
const MAX_RETRIES: usize = 2;

/// Staging files older than this are left over from a crash.
///
/// This is well above the default origin timeout, so no live write is this old.
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// The directory new cache files are staged in until they are complete.
///
/// It lives right next to the shard directories, so persisting a file is an atomic rename on
/// the same file system.
#[derive(Debug, Clone)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join("tmp"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes stale files from the staging directory, creating it if needed.
    ///
    /// Files last modified more than `max_age` ago stem from a crashed write, and are never going
    /// to be completed. Younger files may belong to another process writing into the same cache,
    /// and are left alone. Returns the number of removed files.
    pub fn clear_stale(&self, max_age: Duration) -> Result<usize, CacheError> {
        let create_err = |source| CacheError::CreateDir {
            path: self.path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.path).map_err(create_err)?;

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.path).map_err(create_err)? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let age = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .map(|modified| modified.elapsed().unwrap_or_default());
            match age {
                Ok(age) if age > max_age => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(
                        error = &e as &dyn std::error::Error,
                        path = %path.display(),
                        "Failed to check age of staging file",
                    );
                    continue;
                }
            }

            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match catch_not_found(|| result) {
                Ok(Some(())) => removed += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "Failed to remove stale staging file",
                ),
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Removed stale files from `{}`", self.path.display());
        }
        Ok(removed)
    }

    /// Creates a new temporary file to stage a cache entry in.
    pub fn tempfile(&self) -> io::Result<NamedTempFile> {
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(e) = std::fs::create_dir_all(&self.path) {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %self.path.display(),
                    "Failed to create staging directory",
                );
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match tempfile::Builder::new().prefix("tmp").tempfile_in(&self.path) {
                Ok(temp_file) => return Ok(temp_file),
                Err(e) => {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        path = %self.path.display(),
                        "Failed to create staging file",
                    );
                    if retries > MAX_RETRIES {
                        return Err(e);
                    }
                    continue;
                }
            }
        }
    }
}

/// Atomically moves a fully written temp file to its final location in the cache.
///
/// An existing file at `cache_path` is replaced.
pub fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<()> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;

    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %parent.display(),
                "Failed to create shard directory",
            );
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    path = %cache_path.display(),
                    "Failed to persist cache file",
                );
                if retries > MAX_RETRIES {
                    return Err(err);
                }
                continue;
            }
        }
    }
}

/// Turns a `NotFound` error into `Ok(None)`.
///
/// Files in the cache may disappear at any time, which is expected and no cause for concern.
pub(super) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
