//! Fixed-size pool of persistent worker threads.
//!
//! Workers drain a shared FIFO queue until they dequeue a termination
//! sentinel; shutdown enqueues exactly one sentinel per worker and joins.
//! A failing task is routed to the failure handler (or logged) and never
//! takes its worker down.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use super::task::{FailureHandler, Message, Task};
use crate::config::PoolConfig;
use crate::error::{PoolError, TaskFailure};

/// State shared between the pool front-end and its workers.
struct PoolShared {
    queue: Mutex<VecDeque<Message>>,
    available: Condvar,
    shutdown: AtomicBool,
    failure_handler: Option<FailureHandler>,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl PoolShared {
    fn submit(&self, task: Task) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PoolError::Shutdown);
        }
        self.queue.lock().push_back(Message::Run(task));
        self.available.notify_one();
        Ok(())
    }
}

/// Counters describing pool activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub workers: usize,
    /// Tasks dequeued and run to completion (successfully or not).
    pub tasks_executed: u64,
    /// Tasks that returned an error or panicked.
    pub task_failures: u64,
}

/// A fixed-size pool of persistent worker threads over an unbounded FIFO
/// queue. Producers never block; workers block while the queue is empty.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Start a pool; task failures are logged.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::build(config, None)
    }

    /// Start a pool routing task failures to `handler` instead of the log.
    pub fn with_failure_handler(
        config: PoolConfig,
        handler: FailureHandler,
    ) -> Result<Self, PoolError> {
        Self::build(config, Some(handler))
    }

    fn build(
        config: PoolConfig,
        failure_handler: Option<FailureHandler>,
    ) -> Result<Self, PoolError> {
        let worker_count = config.worker_count();
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            failure_handler,
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = Arc::clone(&shared);
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, id));
            if config.stack_size > 0 {
                builder = builder.stack_size(config.stack_size);
            }
            workers.push(builder.spawn(move || worker_loop(id, shared))?);
        }

        debug!(workers = worker_count, "worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        })
    }

    /// Enqueue a task. Non-blocking; FIFO relative to other submissions.
    ///
    /// Fails fast with [`PoolError::Shutdown`] once [`shutdown`] has been
    /// called; a pool is single-use.
    ///
    /// [`shutdown`]: WorkerPool::shutdown
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        self.shared.submit(task)
    }

    /// A cloneable submission handle that does not keep the pool alive.
    ///
    /// Tasks that reschedule follow-up work hold one of these; once the pool
    /// is dropped or shut down, submissions through the handle fail with
    /// [`PoolError::Shutdown`].
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Block until every task submitted before this call has completed.
    ///
    /// One rendezvous task is submitted per worker; all workers and the
    /// caller meet at a barrier, which pins each rendezvous to a distinct
    /// worker and therefore proves each worker has drained its earlier
    /// share of the queue. Must not be called from a worker thread, and
    /// must not race [`shutdown`](WorkerPool::shutdown): a rendezvous
    /// interrupted by the sentinels would strand its waiters.
    pub fn sync(&self) -> Result<(), PoolError> {
        let barrier = Arc::new(Barrier::new(self.worker_count + 1));
        for _ in 0..self.worker_count {
            let barrier = Arc::clone(&barrier);
            self.submit(Task::named("rendezvous", move || {
                barrier.wait();
                Ok(())
            }))?;
        }
        barrier.wait();
        Ok(())
    }

    /// Stop the pool: enqueue one termination sentinel per worker, then
    /// join every worker. Tasks already queued ahead of the sentinels still
    /// run; new submissions are rejected. Idempotent.
    pub fn shutdown(&self) {
        // Reject new submissions before the sentinels go in; nothing may
        // queue behind them.
        self.shared.shutdown.store(true, Ordering::SeqCst);

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock();
            if guard.is_empty() {
                return;
            }
            std::mem::take(&mut *guard)
        };

        {
            let mut queue = self.shared.queue.lock();
            for _ in 0..workers.len() {
                queue.push_back(Message::Terminate);
            }
        }
        self.shared.available.notify_all();

        for worker in workers {
            if worker.join().is_err() {
                // run_task contains panics; this is a bug in the loop itself
                error!("worker thread panicked outside task execution");
            }
        }
        debug!("worker pool stopped");
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether [`shutdown`](WorkerPool::shutdown) has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Current activity counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.worker_count,
            tasks_executed: self.shared.executed.load(Ordering::Relaxed),
            task_failures: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Weak submission handle returned by [`WorkerPool::handle`].
#[derive(Clone)]
pub struct PoolHandle {
    shared: Weak<PoolShared>,
}

impl PoolHandle {
    /// Enqueue a task through the handle. Fails with
    /// [`PoolError::Shutdown`] if the pool is gone or stopping.
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        match self.shared.upgrade() {
            Some(shared) => shared.submit(task),
            None => Err(PoolError::Shutdown),
        }
    }
}

fn worker_loop(id: usize, shared: Arc<PoolShared>) {
    loop {
        let message = {
            let mut queue = shared.queue.lock();
            loop {
                match queue.pop_front() {
                    Some(message) => break message,
                    None => shared.available.wait(&mut queue),
                }
            }
        };

        match message {
            Message::Terminate => {
                debug!(worker = id, "worker received termination sentinel");
                break;
            }
            Message::Run(task) => run_task(&shared, task),
        }
    }
}

fn run_task(shared: &PoolShared, task: Task) {
    let (label, run) = task.into_parts();
    let outcome = panic::catch_unwind(AssertUnwindSafe(run));
    shared.executed.fetch_add(1, Ordering::Relaxed);

    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(payload) => panic_message(payload.as_ref()).into(),
    };

    shared.failed.fetch_add(1, Ordering::Relaxed);
    let failure = TaskFailure { label, error };
    match &shared.failure_handler {
        Some(handler) => handler(failure),
        None => error!(%failure, "worker task failed"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {message}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn small_pool(workers: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig::with_workers(workers)).expect("spawn pool")
    }

    #[test]
    fn runs_submitted_tasks() {
        let pool = small_pool(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.submit(Task::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        pool.sync().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn fifo_order_with_single_worker() {
        let pool = small_pool(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            pool.submit(Task::new(move || {
                order.lock().push(i);
                Ok(())
            }))
            .unwrap();
        }

        pool.sync().unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn failure_handler_receives_failed_task() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let handler: FailureHandler = Arc::new(move |failure| {
            sink.lock().push(failure.label.clone());
        });

        let pool =
            WorkerPool::with_failure_handler(PoolConfig::with_workers(1), handler).unwrap();
        pool.submit(Task::named("bad-task", || Err("boom".into())))
            .unwrap();
        pool.sync().unwrap();

        assert_eq!(*failures.lock(), vec!["bad-task".to_string()]);
        assert_eq!(pool.stats().task_failures, 1);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = small_pool(1);
        pool.submit(Task::named("explodes", || panic!("kaboom")))
            .unwrap();

        // The same (only) worker must still run this.
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        pool.submit(Task::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        pool.sync().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().task_failures, 1);
    }

    #[test]
    fn submit_after_shutdown_fails_fast() {
        let pool = small_pool(2);
        pool.shutdown();

        let result = pool.submit(Task::new(|| Ok(())));
        assert!(matches!(result, Err(PoolError::Shutdown)));
        assert!(pool.is_shutdown());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = small_pool(3);
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn handle_outlives_pool_without_keeping_it_alive() {
        let pool = small_pool(1);
        let handle = pool.handle();
        drop(pool);

        let result = handle.submit(Task::new(|| Ok(())));
        assert!(matches!(result, Err(PoolError::Shutdown)));
    }

    #[test]
    fn sync_waits_for_prior_tasks() {
        let pool = small_pool(3);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.submit(Task::new(move || {
                thread::sleep(std::time::Duration::from_millis(2));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        pool.sync().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
