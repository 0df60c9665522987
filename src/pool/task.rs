//! Task representation for the worker pool.

use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, TaskFailure};

/// Handler invoked with a [`TaskFailure`] when a task errors or panics and
/// the pool owner wants centralized routing instead of the default log line.
pub type FailureHandler = Arc<dyn Fn(TaskFailure) + Send + Sync + 'static>;

/// An opaque unit of work: a labelled, fallible, run-once closure.
///
/// The queue owns a task exclusively until a worker dequeues it. Results are
/// delivered out-of-band by the closure itself; the pool only observes
/// success or failure.
pub struct Task {
    label: String,
    run: Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>,
}

impl Task {
    /// Create an unlabelled task.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self::named("task", run)
    }

    /// Create a task with a label used in logs and failure reports.
    pub fn named<F>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
        }
    }

    /// The label this task was submitted under.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn into_parts(
        self,
    ) -> (String, Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>) {
        (self.label, self.run)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

/// Queue element: either work or the per-worker termination sentinel.
#[derive(Debug)]
pub(crate) enum Message {
    Run(Task),
    Terminate,
}
