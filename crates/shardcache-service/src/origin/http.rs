//! Support to fetch content from an HTTP server.

use std::io;
use std::time::Duration;

use anyhow::Context;
use futures::TryStreamExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio_util::io::StreamReader;
use url::Url;

use super::{Origin, OriginStream};

/// Configuration of an [`HttpOrigin`].
#[derive(Clone, Debug, Deserialize)]
pub struct HttpOriginConfig {
    /// The URL that keys are resolved against.
    pub base_url: Url,
    /// The timeout for establishing a connection.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Global timeout for fetching one key, including the body.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl HttpOriginConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            connect_timeout: default_connect_timeout(),
            timeout: default_timeout(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_timeout() -> Duration {
    Duration::from_secs(315)
}

/// Fetches keys as paths relative to a base URL.
///
/// Keys have to be valid UTF-8. Responses with a non-success status are errors.
#[derive(Debug)]
pub struct HttpOrigin {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpOrigin {
    pub fn new(config: &HttpOriginConfig) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;

        // Without a trailing slash, `Url::join` would replace the last path segment.
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    /// Returns the URL `key` is fetched from.
    pub fn url_for(&self, key: &[u8]) -> anyhow::Result<Url> {
        let path = std::str::from_utf8(key).context("key is not valid UTF-8")?;
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid key `{path}`"))
    }

    async fn fetch_stream(&self, key: &[u8]) -> anyhow::Result<OriginStream> {
        let url = self.url_for(key)?;
        tracing::debug!("Fetching from origin `{url}`");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch `{url}`"))?
            .error_for_status()
            .with_context(|| format!("failed to fetch `{url}`"))?;

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }
}

impl Origin for HttpOrigin {
    fn fetch<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, anyhow::Result<OriginStream>> {
        Box::pin(self.fetch_stream(key))
    }
}
