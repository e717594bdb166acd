//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shardcache_service::caching::{Cache, CacheKey, Evictor, SHARD_COUNT, ShardRouter};
use shardcache_service::config::{CacheConfig, Config};
use tokio::io::AsyncWrite;

use crate::logging;

/// Shardcache commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Serve a key through the cache, fetching it from the origin on a miss.
    Fetch {
        /// The key to fetch.
        key: String,

        /// Where to write the content to, defaults to stdout.
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Report the size of a shard against its budget.
    Survey {
        /// The shard to survey, defaults to a random one.
        #[arg(long, value_parser = clap::value_parser!(u16).range(0..SHARD_COUNT as i64))]
        shard: Option<u16>,
    },

    /// Run one eviction pass, removing up to the given number of bytes from every shard.
    Purge {
        /// The number of bytes to remove from each shard.
        bytes: u64,
    },

    /// Print the path a key is stored at.
    Path {
        /// The key to locate.
        key: String,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is only started below, so no other threads exist yet.
    unsafe { logging::init_logging(&config) };

    match cli.command {
        Command::Fetch { key, output } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start the runtime")?;
            runtime.block_on(fetch(config, &key, output.as_deref()))?;
        }
        Command::Survey { shard } => {
            let evictor = evictor(&config.cache)?;
            let survey = match shard {
                Some(shard) => evictor.survey_shard(shard),
                None => evictor.survey(),
            };
            println!(
                "shard {}: {} bytes, budget {} bytes",
                survey.shard, survey.size, survey.budget
            );
            if let Some(excess) = survey.excess() {
                println!("over budget by {excess} bytes");
            }
        }
        Command::Purge { bytes } => {
            let stats = evictor(&config.cache)?.purge(bytes);
            println!(
                "removed {} of {} files ({} bytes) in {:?}, {} failures",
                stats.removed_files, stats.names, stats.removed_bytes, stats.elapsed, stats.failures
            );
        }
        Command::Path { key } => {
            let router = ShardRouter::new(&config.cache.dir);
            println!("{}", router.path_for(&CacheKey::new(&key)).display());
        }
    }

    Ok(())
}

fn evictor(config: &CacheConfig) -> Result<Evictor> {
    config.validate()?;
    let router = ShardRouter::new(&config.dir);
    router.create_dirs()?;
    Ok(Evictor::new(router, config.max_size, config.eviction_factor))
}

async fn fetch(config: Config, key: &str, output: Option<&Path>) -> Result<()> {
    let origin = config
        .origin
        .as_ref()
        .context("no origin configured")?
        .build()
        .context("failed to create the origin")?;
    let cache = Cache::with_shared_origin(config.cache, origin)
        .context("failed to create the cache")?;

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create `{}`", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let result = cache.fetch(&mut sink, key.as_bytes()).await;
    cache.shutdown().await;

    let written = result.with_context(|| format!("failed to fetch `{key}`"))?;
    tracing::info!(key, written, "Fetched key");

    Ok(())
}
