//! Bounded worker-thread pool with poison-pill shutdown.

mod task;
mod worker;

pub use task::{FailureHandler, Task};
pub use worker::{PoolHandle, PoolStats, WorkerPool};
