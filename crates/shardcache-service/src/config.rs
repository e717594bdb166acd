use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::caching::CacheError;
use crate::origin::OriginConfig;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Configuration of the disk cache.
///
/// This is set once when creating the [`Cache`](crate::caching::Cache), and never changes while
/// it is running.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// The root directory holding all the shard directories.
    pub dir: PathBuf,
    /// The total number of bytes the cache should hold, approximately.
    pub max_size: u64,
    /// The fraction of its share of `max_size` a single shard may use before it is trimmed.
    pub eviction_factor: f64,
    /// How often a random shard is surveyed.
    #[serde(with = "humantime_serde")]
    pub survey_interval: Duration,
    /// How long to wait for a concurrent fetch of the same key before giving up on it.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
    /// How long to wait for the entry to appear after giving up on the lock.
    #[serde(with = "humantime_serde")]
    pub fallback_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            // 10 GiB
            max_size: 10 * 1024 * 1024 * 1024,
            eviction_factor: 0.9,
            survey_interval: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(2),
            fallback_delay: Duration::from_millis(500),
        }
    }
}

impl CacheConfig {
    /// Creates a config for a cache in `dir`, with defaults for everything but the size.
    pub fn new(dir: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            dir: dir.into(),
            max_size,
            ..Self::default()
        }
    }

    /// Checks that the values make sense together.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "`max_size` must be greater than zero".into(),
            ));
        }
        if !(self.eviction_factor > 0.0 && self.eviction_factor <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "`eviction_factor` must be in (0, 1], got {}",
                self.eviction_factor
            )));
        }
        if self.survey_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "`survey_interval` must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// The disk cache.
    pub cache: CacheConfig,

    /// Where to fetch content from on a cache miss.
    pub origin: Option<OriginConfig>,

    /// Configure logging.
    pub logging: Logging,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
