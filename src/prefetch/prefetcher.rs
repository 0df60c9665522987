//! Proactive paginated result prefetching.
//!
//! A [`Prefetcher`] keeps a constant number of page fetches in flight on a
//! dedicated worker pool and merges completed pages into a growing buffer.
//! Consumers block only when they outrun the prefetch. Page numbers are
//! walked in N independent lanes (lane *i* requests pages `i, i+N, i+2N, …`);
//! items land in the buffer in completion order, so there is no ordering
//! guarantee across pages.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use super::iter::Iter;
use crate::config::{PoolConfig, PrefetchConfig};
use crate::error::{BoxError, FeederError, PoolError};
use crate::pool::{FailureHandler, PoolHandle, Task, WorkerPool};

/// Caller-supplied page source. `Ok(vec![])` retires the lane.
pub(crate) type Feeder<T> = Arc<dyn Fn(u64) -> Result<Vec<T>, BoxError> + Send + Sync + 'static>;

/// The one shared-state unit: buffer, in-flight pages, terminal flag, and
/// undelivered feeder failures, all guarded by a single mutex/condvar pair.
pub(crate) struct Shared<T> {
    pub(crate) state: Mutex<State<T>>,
    pub(crate) progressed: Condvar,
}

pub(crate) struct State<T> {
    pub(crate) buffer: Vec<T>,
    pub(crate) pending: HashSet<u64>,
    pub(crate) done: bool,
    pub(crate) failures: VecDeque<FeederError>,
}

impl<T> State<T> {
    fn empty() -> Self {
        Self {
            buffer: Vec::new(),
            pending: HashSet::new(),
            done: false,
            failures: VecDeque::new(),
        }
    }
}

impl<T> Shared<T> {
    /// Block until a failure is queued, the buffer grows, or no page is in
    /// flight anymore. An empty in-flight set is the sole termination
    /// signal, so observing it flips `done`.
    pub(crate) fn feed_me(&self, state: &mut MutexGuard<'_, State<T>>) {
        let start = state.buffer.len();
        while state.failures.is_empty()
            && !state.pending.is_empty()
            && state.buffer.len() == start
        {
            self.progressed.wait(state);
        }
        if state.pending.is_empty() {
            state.done = true;
        }
    }
}

/// Observed prefetch progress; see [`Prefetcher::progress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Items merged so far.
    pub buffered: usize,
    /// Page numbers currently in flight, sorted.
    pub pending_pages: Vec<u64>,
    /// Whether the set has been observed complete.
    pub done: bool,
}

/// A prefetching aggregator over a paginated data source.
///
/// Construction seeds fetches for pages `1..=N`; every completed non-empty
/// page schedules the next page of its lane, keeping N fetches in flight
/// until each lane independently observes an empty page. Consumer methods
/// ([`iter`], [`get`], [`to_vec`]) block while the buffer is behind and the
/// set is not yet complete.
///
/// [`flush`] resets the whole result set and is the only cancellation
/// primitive; it takes `&mut self`, so it cannot race in-progress consumer
/// calls on other threads.
///
/// [`iter`]: Prefetcher::iter
/// [`get`]: Prefetcher::get
/// [`to_vec`]: Prefetcher::to_vec
/// [`flush`]: Prefetcher::flush
pub struct Prefetcher<T> {
    shared: Arc<Shared<T>>,
    feeder: Feeder<T>,
    failure_handler: Option<FailureHandler>,
    config: PrefetchConfig,
    pool: WorkerPool,
}

impl<T: Send + 'static> Prefetcher<T> {
    /// Start prefetching with the default configuration.
    pub fn new<F, E>(feeder: F) -> Result<Self, PoolError>
    where
        F: Fn(u64) -> Result<Vec<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::build(PrefetchConfig::default(), feeder, None)
    }

    /// Start prefetching with an explicit configuration.
    pub fn with_config<F, E>(config: PrefetchConfig, feeder: F) -> Result<Self, PoolError>
    where
        F: Fn(u64) -> Result<Vec<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::build(config, feeder, None)
    }

    /// Start prefetching, routing worker task failures to `handler`.
    pub fn with_failure_handler<F, E>(
        config: PrefetchConfig,
        feeder: F,
        handler: FailureHandler,
    ) -> Result<Self, PoolError>
    where
        F: Fn(u64) -> Result<Vec<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::build(config, feeder, Some(handler))
    }

    fn build<F, E>(
        config: PrefetchConfig,
        feeder: F,
        failure_handler: Option<FailureHandler>,
    ) -> Result<Self, PoolError>
    where
        F: Fn(u64) -> Result<Vec<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let feeder: Feeder<T> = Arc::new(move |page| feeder(page).map_err(Into::into));
        let shared = Arc::new(Shared {
            state: Mutex::new(State::empty()),
            progressed: Condvar::new(),
        });
        let pool = spawn_lane_pool(&config, failure_handler.clone())?;
        let prefetcher = Self {
            shared,
            feeder,
            failure_handler,
            config,
            pool,
        };
        prefetcher.seed_lanes()?;
        Ok(prefetcher)
    }

    /// Discard all state and start the result set over.
    ///
    /// The old pool is fully shut down (in-flight fetches finish, workers
    /// join) before the buffer, in-flight set, and failure queue are
    /// cleared and lanes `1..=N` are reseeded, so no stale lane can touch
    /// the fresh state.
    pub fn flush(&mut self) -> Result<(), PoolError> {
        self.pool.shutdown();
        {
            let mut state = self.shared.state.lock();
            state.buffer.clear();
            state.pending.clear();
            state.failures.clear();
            state.done = false;
        }
        self.pool = spawn_lane_pool(&self.config, self.failure_handler.clone())?;
        self.seed_lanes()
    }

    fn seed_lanes(&self) -> Result<(), PoolError> {
        let handle = self.pool.handle();
        let stride = self.config.concurrency as u64;
        for page in 1..=stride {
            schedule_fetch(&self.shared, &self.feeder, &handle, stride, page)?;
        }
        Ok(())
    }

    /// Blocking iterator over the buffer in append order.
    ///
    /// Each call starts an independent cursor at the first item. The
    /// iterator yields items as they become available, yields a queued
    /// lane failure when it would otherwise have to report a premature
    /// end, and finishes once the set is complete and drained.
    pub fn iter(&self) -> Iter<'_, T>
    where
        T: Clone,
    {
        Iter::new(&self.shared)
    }

    /// Index into the result set, waiting until enough pages have loaded.
    ///
    /// Returns `Ok(None)` if `index` is beyond the final size once the set
    /// is complete; never blocks forever on an out-of-range index. A queued
    /// lane failure is delivered instead of a premature `None`.
    pub fn get(&self, index: usize) -> Result<Option<T>, FeederError>
    where
        T: Clone,
    {
        let mut state = self.shared.state.lock();
        loop {
            if index < state.buffer.len() {
                return Ok(Some(state.buffer[index].clone()));
            }
            if let Some(failure) = state.failures.pop_front() {
                return Err(failure);
            }
            if state.done {
                return Ok(None);
            }
            self.shared.feed_me(&mut state);
        }
    }

    /// Wait for the entire result set, then return a snapshot of it.
    ///
    /// Repeated calls on a completed, failure-free set return equal
    /// snapshots.
    pub fn to_vec(&self) -> Result<Vec<T>, FeederError>
    where
        T: Clone,
    {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(failure) = state.failures.pop_front() {
                return Err(failure);
            }
            if state.done {
                return Ok(state.buffer.clone());
            }
            self.shared.feed_me(&mut state);
        }
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> Progress {
        let state = self.shared.state.lock();
        let mut pending_pages: Vec<u64> = state.pending.iter().copied().collect();
        pending_pages.sort_unstable();
        Progress {
            buffered: state.buffer.len(),
            pending_pages,
            done: state.done,
        }
    }

    /// Whether the set has been observed complete.
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().done
    }

    /// The configured number of lanes.
    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }
}

fn spawn_lane_pool(
    config: &PrefetchConfig,
    handler: Option<FailureHandler>,
) -> Result<WorkerPool, PoolError> {
    let pool_config = PoolConfig {
        workers: config.concurrency.max(1),
        thread_name_prefix: config.thread_name_prefix.clone(),
        ..Default::default()
    };
    match handler {
        Some(handler) => WorkerPool::with_failure_handler(pool_config, handler),
        None => WorkerPool::new(pool_config),
    }
}

/// Mark `page` in flight and submit its fetch task.
///
/// On submission failure (pool stopping) the page is un-marked and waiters
/// are notified, so nobody blocks on a page that will never arrive.
fn schedule_fetch<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    feeder: &Feeder<T>,
    handle: &PoolHandle,
    stride: u64,
    page: u64,
) -> Result<(), PoolError> {
    {
        let mut state = shared.state.lock();
        let fresh = state.pending.insert(page);
        debug_assert!(fresh, "page {page} scheduled twice");
    }

    let task_shared = Arc::clone(shared);
    let task_feeder = Arc::clone(feeder);
    let task_handle = handle.clone();
    let result = handle.submit(Task::named(format!("fetch-page-{page}"), move || {
        fetch_and_merge(&task_shared, &task_feeder, &task_handle, stride, page)
    }));

    if result.is_err() {
        let mut state = shared.state.lock();
        state.pending.remove(&page);
        drop(state);
        shared.progressed.notify_all();
    }
    result
}

/// One lane step, run on a worker: fetch `page`, merge its items, and keep
/// the lane going unless the page was empty or the feeder failed.
fn fetch_and_merge<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    feeder: &Feeder<T>,
    handle: &PoolHandle,
    stride: u64,
    page: u64,
) -> Result<(), BoxError> {
    let items = match feeder(page) {
        Ok(items) => items,
        Err(source) => {
            let description = format!("feeder failed on page {page}: {source}");
            {
                let mut state = shared.state.lock();
                state.pending.remove(&page);
                state.failures.push_back(FeederError { page, source });
            }
            shared.progressed.notify_all();
            // the failing lane retires; the error also propagates to the
            // pool's failure handler via this return
            return Err(description.into());
        }
    };

    if items.is_empty() {
        {
            let mut state = shared.state.lock();
            state.pending.remove(&page);
        }
        shared.progressed.notify_all();
        debug!(page, "lane exhausted");
        return Ok(());
    }

    let merged = items.len();
    {
        let mut state = shared.state.lock();
        state.buffer.extend(items);
    }

    // The next page must be marked in flight before this one retires:
    // waiters must never observe an empty in-flight set mid-lane.
    let next = page + stride;
    if schedule_fetch(shared, feeder, handle, stride, next).is_err() {
        debug!(page = next, "pool stopping; lane not continued");
    }

    {
        let mut state = shared.state.lock();
        state.pending.remove(&page);
    }
    shared.progressed.notify_all();
    debug!(page, items = merged, "page merged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_one_lane_per_concurrency_slot() {
        // A feeder that never completes its first pages would be flaky to
        // assert on; an immediately-exhausted source is deterministic.
        let prefetcher =
            Prefetcher::with_config(PrefetchConfig::with_concurrency(4), |_page| {
                Ok::<Vec<u32>, std::convert::Infallible>(Vec::new())
            })
            .unwrap();

        assert_eq!(prefetcher.concurrency(), 4);
        let all = prefetcher.to_vec().unwrap();
        assert!(all.is_empty());
        assert!(prefetcher.is_done());
        assert!(prefetcher.progress().pending_pages.is_empty());
    }

    #[test]
    fn progress_reports_buffered_items() {
        let prefetcher =
            Prefetcher::with_config(PrefetchConfig::with_concurrency(2), |page| {
                if page <= 2 {
                    Ok::<_, std::convert::Infallible>(vec![page])
                } else {
                    Ok(Vec::new())
                }
            })
            .unwrap();

        let all = prefetcher.to_vec().unwrap();
        let progress = prefetcher.progress();
        assert_eq!(progress.buffered, all.len());
        assert!(progress.done);
    }
}
