//! Telemetry for the pool and prefetch layers.
//!
//! Structured logging only; events are emitted via `tracing` at the
//! lifecycle and failure points of the pool and the prefetcher.

mod logging;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
