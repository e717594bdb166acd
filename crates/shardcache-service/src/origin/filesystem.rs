//! Support to fetch content from the local filesystem.
//!
//! Mostly useful for testing, or to put a cache in front of a slow network mount.

use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::fs::File;

use super::{Origin, OriginStream};

/// Configuration of a [`FilesystemOrigin`].
#[derive(Clone, Debug, Deserialize)]
pub struct FilesystemOriginConfig {
    /// The directory that keys are resolved against.
    pub path: PathBuf,
}

/// Fetches keys as relative paths below a directory.
#[derive(Debug)]
pub struct FilesystemOrigin {
    root: PathBuf,
}

impl FilesystemOrigin {
    pub fn new(config: &FilesystemOriginConfig) -> Self {
        Self {
            root: config.path.clone(),
        }
    }

    /// Returns the path `key` is read from.
    ///
    /// Keys must be relative paths that stay inside of the root directory.
    pub fn path_for(&self, key: &[u8]) -> anyhow::Result<PathBuf> {
        let key = std::str::from_utf8(key).context("key is not valid UTF-8")?;
        let relative = Path::new(key);

        let mut has_name = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => has_name = true,
                Component::CurDir => {}
                _ => anyhow::bail!("invalid key `{key}`: must be a relative path without `..`"),
            }
        }
        if !has_name {
            anyhow::bail!("invalid key `{key}`: empty path");
        }

        Ok(self.root.join(relative))
    }

    async fn fetch_file(&self, key: &[u8]) -> anyhow::Result<OriginStream> {
        let path = self.path_for(key)?;
        tracing::debug!("Fetching from origin `{}`", path.display());

        let file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => anyhow::anyhow!("`{}` not found", path.display()),
            _ => anyhow::Error::new(e).context(format!("failed to open `{}`", path.display())),
        })?;

        Ok(Box::pin(file))
    }
}

impl Origin for FilesystemOrigin {
    fn fetch<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, anyhow::Result<OriginStream>> {
        Box::pin(self.fetch_file(key))
    }
}
