//! Runtime error taxonomy.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised by the worker pool itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Work was submitted after `shutdown` began.
    #[error("Worker pool is shutting down")]
    ShutdownInProgress,

    /// The process-wide pool was configured after it had been created.
    #[error("Global worker pool is already initialized")]
    AlreadyInitialized,

    /// The operating system refused to start a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

/// Errors raised while running submitted work.
#[derive(Debug, Error, Clone)]
pub enum TaskError {
    /// A node body, arena callable or parallel-for leaf failed or panicked.
    #[error("Task '{task}' failed: {cause}")]
    BodyFailed {
        /// Name of the failing task or node.
        task: String,
        /// What went wrong.
        cause: Arc<anyhow::Error>,
    },

    /// The work could not be submitted.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl TaskError {
    /// Wrap an error returned by a body.
    pub fn body_failed(
        task: impl Into<String>,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        TaskError::BodyFailed {
            task: task.into(),
            cause: Arc::new(cause.into()),
        }
    }

    /// Wrap a panic payload caught from a body.
    pub fn from_panic(
        task: impl Into<String>,
        panic: Box<dyn Any + Send>,
    ) -> Self {
        Self::body_failed(task, anyhow::anyhow!(panic_message(panic.as_ref())))
    }

    /// Name of the failing task, if the failure came from a body.
    pub fn task(&self) -> Option<&str> {
        match self {
            TaskError::BodyFailed { task, .. } => Some(task),
            TaskError::Pool(_) => None,
        }
    }
}

/// Human readable text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        String::from("panicked with unknown payload")
    }
}
