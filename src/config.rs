//! Configuration loading from environment variables.
//!
//! All values are loaded from `PAGEPOOL_*` environment variables with
//! sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `PAGEPOOL_WORKER_THREADS` | 0 | Pool worker threads (0 = auto-detect) |
//! | `PAGEPOOL_STACK_SIZE` | 0 | Worker stack size in bytes (0 = platform default) |
//! | `PAGEPOOL_PREFETCH_CONCURRENCY` | 3 | Pages kept in flight by a prefetcher |

/// Default number of pages a prefetcher keeps in flight.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 3;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads (0 = auto-detect).
    pub workers: usize,
    /// Thread stack size in bytes (0 = platform default).
    pub stack_size: usize,
    /// Thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            stack_size: 0,
            thread_name_prefix: "pagepool-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Config with a specific worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Resolve the effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

/// Prefetcher configuration.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Number of lanes, i.e. pages kept in flight. Also the size of the
    /// prefetcher's worker pool. Constant for the prefetcher's lifetime.
    pub concurrency: usize,
    /// Thread name prefix for the prefetcher's workers.
    pub thread_name_prefix: String,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            thread_name_prefix: "prefetch".to_string(),
        }
    }
}

impl PrefetchConfig {
    /// Config keeping `concurrency` pages in flight (floored at 1).
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..Default::default()
        }
    }
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub pool: PoolConfig,
    pub prefetch: PrefetchConfig,
}

/// Effective configuration summary after defaults and clamping.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub worker_threads: usize,
    pub stack_size: usize,
    pub prefetch_concurrency: usize,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let workers = parse_usize("PAGEPOOL_WORKER_THREADS", 0);
    let stack_size = parse_usize("PAGEPOOL_STACK_SIZE", 0);
    let concurrency = parse_usize("PAGEPOOL_PREFETCH_CONCURRENCY", DEFAULT_PREFETCH_CONCURRENCY);
    let concurrency = concurrency.clamp(1, 128);

    EnvConfig {
        pool: PoolConfig {
            workers,
            stack_size,
            ..Default::default()
        },
        prefetch: PrefetchConfig {
            concurrency,
            ..Default::default()
        },
    }
}

impl EnvConfig {
    /// Return a summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            worker_threads: self.pool.worker_count(),
            stack_size: self.pool.stack_size,
            prefetch_concurrency: self.prefetch.concurrency,
        }
    }
}
