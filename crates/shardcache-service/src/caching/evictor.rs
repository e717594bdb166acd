//! Approximate, sampling based eviction.
//!
//! There is no index of cache entries and no running byte counter. Instead, the evictor looks at
//! one random shard at a time and extrapolates from it: keys are spread uniformly over all
//! shards, so one shard exceeding its fair share of the budget means the whole cache most likely
//! does as well.
//!
//! Eviction itself is uniformly random. No access times are tracked, which keeps the write path
//! free of any bookkeeping.

use std::fs::{read_dir, remove_file};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::{Rng, thread_rng};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::cache_key::SHARD_COUNT;
use super::fs::catch_not_found;
use super::shards::ShardRouter;

/// The outcome of measuring a single shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Survey {
    /// Index of the measured shard.
    pub shard: u16,
    /// Total size of all the files in the shard.
    pub size: u64,
    /// The share of the cache budget this shard is allowed to use.
    pub budget: u64,
}

impl Survey {
    /// The number of bytes the shard is over its budget, if any.
    pub fn excess(&self) -> Option<u64> {
        self.size.checked_sub(self.budget).filter(|excess| *excess > 0)
    }
}

/// Statistics about one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// The number of entries listed across all shards.
    pub names: usize,
    pub removed_files: usize,
    pub removed_bytes: u64,
    /// Entries that could not be inspected or removed.
    pub failures: usize,
    pub elapsed: Duration,
}

/// Keeps the cache near its size budget by sampling and random eviction.
#[derive(Debug, Clone)]
pub struct Evictor {
    router: ShardRouter,
    max_size: u64,
    eviction_factor: f64,
}

impl Evictor {
    pub fn new(router: ShardRouter, max_size: u64, eviction_factor: f64) -> Self {
        Self {
            router,
            max_size,
            eviction_factor,
        }
    }

    /// The number of bytes a single shard may hold before an eviction pass is triggered.
    pub fn shard_budget(&self) -> u64 {
        (self.max_size as f64 / SHARD_COUNT as f64 * self.eviction_factor) as u64
    }

    /// Measures a randomly chosen shard.
    pub fn survey(&self) -> Survey {
        let shard = thread_rng().gen_range(0..SHARD_COUNT);
        self.survey_shard(shard)
    }

    /// Measures the total size of all the files in the given shard.
    ///
    /// Entries that cannot be read are skipped, they most likely vanished while walking.
    pub fn survey_shard(&self, shard: u16) -> Survey {
        let dir = self.router.shard_dir(shard);

        let size = WalkDir::new(&dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|entry| entry.metadata().ok())
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len())
            .sum();

        let survey = Survey {
            shard,
            size,
            budget: self.shard_budget(),
        };
        tracing::info!(
            shard,
            size = survey.size,
            budget = survey.budget,
            "Surveyed cache shard `{}`",
            dir.display()
        );

        survey
    }

    /// Surveys a random shard, and runs an eviction pass if it is over budget.
    pub fn run_once(&self) -> Option<PurgeStats> {
        let shard = thread_rng().gen_range(0..SHARD_COUNT);
        self.sample_shard(shard)
    }

    /// Surveys the given shard, and runs an eviction pass if it is over budget.
    ///
    /// The excess of the sampled shard is what every shard gets trimmed by.
    pub fn sample_shard(&self, shard: u16) -> Option<PurgeStats> {
        let excess = self.survey_shard(shard).excess()?;
        Some(self.purge(excess))
    }

    /// Removes up to `amount` bytes from every shard, picking entries at random.
    ///
    /// Failures to inspect or remove individual entries are logged and skipped.
    pub fn purge(&self, amount: u64) -> PurgeStats {
        tracing::info!(amount, "Purging cache");

        let start = Instant::now();
        let mut stats = PurgeStats::default();
        let mut rng = thread_rng();

        for (_, dir) in self.router.shard_dirs() {
            self.purge_shard(&dir, amount, &mut rng, &mut stats);
        }

        stats.elapsed = start.elapsed();
        tracing::info!(
            amount,
            names = stats.names,
            removed_files = stats.removed_files,
            removed_bytes = stats.removed_bytes,
            failures = stats.failures,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Purged cache",
        );

        stats
    }

    fn purge_shard(&self, dir: &Path, amount: u64, rng: &mut impl Rng, stats: &mut PurgeStats) {
        let entries = match catch_not_found(|| read_dir(dir)) {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                tracing::warn!("Shard directory not found: `{}`", dir.display());
                return;
            }
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %dir.display(),
                    "Failed to list shard directory",
                );
                stats.failures += 1;
                return;
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        path = %dir.display(),
                        "Failed to read shard directory entry",
                    );
                    stats.failures += 1;
                    None
                }
            })
            .collect();
        stats.names += paths.len();
        paths.shuffle(rng);

        let mut remaining = amount;
        for path in paths {
            if remaining == 0 {
                break;
            }
            match try_remove(&path) {
                Ok(Some(size)) => {
                    remaining = remaining.saturating_sub(size);
                    stats.removed_files += 1;
                    stats.removed_bytes += size;
                }
                Ok(None) => {
                    tracing::debug!("Cache file vanished before removal: `{}`", path.display());
                }
                Err(e) => {
                    tracing::error!(
                        error = &e as &dyn std::error::Error,
                        path = %path.display(),
                        "Failed to evict cache file",
                    );
                    stats.failures += 1;
                }
            }
        }
    }

    /// Spawns the periodic sampling task.
    ///
    /// The first run happens right away, and then once every `interval`, until `shutdown` is
    /// cancelled. The file system work is done on the blocking thread pool.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                budget = self.shard_budget(),
                "Cache evictor starting"
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        tracing::info!("Cache evictor shutting down");
                        break;
                    }

                    _ = ticker.tick() => {
                        let evictor = Arc::clone(&self);
                        let pass = tokio::task::spawn_blocking(move || evictor.run_once());
                        if let Err(e) = pass.await {
                            tracing::error!(
                                error = &e as &dyn std::error::Error,
                                "Cache eviction pass failed",
                            );
                        }
                    }
                }
            }
        })
    }
}

/// Removes the file at `path`, returning its size.
///
/// Returns `Ok(None)` if the file was already gone.
fn try_remove(path: &Path) -> std::io::Result<Option<u64>> {
    let Some(metadata) = catch_not_found(|| path.symlink_metadata())? else {
        return Ok(None);
    };
    if !metadata.is_file() {
        return Err(std::io::Error::other("not a file"));
    }

    Ok(catch_not_found(|| remove_file(path))?.map(|()| metadata.len()))
}
