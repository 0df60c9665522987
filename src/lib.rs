//! pagepool — bounded worker pool and proactive paginated prefetching.
//!
//! Two components, leaves first:
//!
//! - [`WorkerPool`]: a fixed-size pool of persistent worker threads draining
//!   a shared FIFO queue, with poison-pill shutdown, an optional centralized
//!   task-failure handler, and a [`sync`](WorkerPool::sync) barrier.
//! - [`Prefetcher`]: a paginated aggregator that keeps N page fetches in
//!   flight on its own pool, merges completed pages into a growing buffer in
//!   completion order, and gives consumers blocking iterator, index, and
//!   snapshot access.
//!
//! The only boundary contract is the feeder callback: page number in, items
//! out, an empty page meaning the lane is exhausted, an error surfacing to
//! exactly one blocked consumer.
//!
//! ```no_run
//! use pagepool::Prefetcher;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let results = Prefetcher::new(|page| -> Result<Vec<String>, std::io::Error> {
//!     Ok(fetch_page_from_service(page))
//! })?;
//!
//! for item in results.iter() {
//!     println!("{}", item?);
//! }
//! # Ok(())
//! # }
//! # fn fetch_page_from_service(_page: u64) -> Vec<String> { Vec::new() }
//! ```

pub mod config;
pub mod error;
pub mod pool;
pub mod prefetch;
pub mod telemetry;

pub use config::{PoolConfig, PrefetchConfig, DEFAULT_PREFETCH_CONCURRENCY};
pub use error::{BoxError, FeederError, PoolError, TaskFailure};
pub use pool::{FailureHandler, PoolHandle, PoolStats, Task, WorkerPool};
pub use prefetch::{Prefetcher, Progress};
