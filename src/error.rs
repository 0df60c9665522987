//! Error types for the pool and prefetch layers.
//!
//! Failures local to one task or one lane never take down a worker thread
//! or corrupt shared state for other lanes.

use thiserror::Error;

/// Boxed error type carried by tasks and feeders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors for worker pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been shut down; a pool is single-use once stopped.
    #[error("worker pool is shut down")]
    Shutdown,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A task that returned an error or panicked inside a worker.
///
/// Handed to the pool's failure handler when one is installed, otherwise
/// logged. The worker that ran the task keeps draining the queue either way.
#[derive(Debug, Error)]
#[error("task '{label}' failed: {error}")]
pub struct TaskFailure {
    /// Label the task was submitted under.
    pub label: String,
    /// The error the task returned, or a description of its panic payload.
    pub error: BoxError,
}

/// A feeder callback failed for a specific page.
///
/// Delivered to exactly one consumer blocked on the result set; the lane
/// that produced it is retired, other lanes keep fetching.
#[derive(Debug, Error)]
#[error("feeder failed on page {page}: {source}")]
pub struct FeederError {
    /// Page number the feeder was asked for.
    pub page: u64,
    /// Underlying error from the feeder.
    #[source]
    pub source: BoxError,
}
