//! Engine error types.

use crate::scheduler::TaskKind;
use ember_sdk::TaskHandle;
use std::fmt::Display;

/// Errors returned by the loop's own API.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The handle is stale, was never issued, or belongs to another loop
    #[error("invalid task handle {0}")]
    InvalidHandle(TaskHandle),

    /// The task already began executing and can no longer be cancelled
    #[error("task {0} has already started")]
    AlreadyStarted(TaskHandle),

    /// The loop has been shut down and accepts no more work
    #[error("event loop has shut down")]
    ShutDown,

    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Worker threads still busy when the shutdown window closed
    #[error("{abandoned} worker thread(s) did not finish before the shutdown timeout")]
    ShutdownTimeout {
        /// Number of threads left detached
        abandoned: usize,
    },
}

/// Result type for loop operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// A scheduled callback returned an error or panicked.
///
/// These never escape the loop; they are handed to the `on_unhandled_error`
/// hook and execution continues with the next unit of work.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallbackError {
    /// The callback returned `Err`
    #[error("{kind} callback failed: {message}")]
    Failed {
        /// Kind of work that failed
        kind: TaskKind,
        /// Handle of the task, when it had one
        handle: Option<TaskHandle>,
        /// Rendered error
        message: String,
    },

    /// The callback panicked
    #[error("{kind} callback panicked: {message}")]
    Panicked {
        /// Kind of work that panicked
        kind: TaskKind,
        /// Handle of the task, when it had one
        handle: Option<TaskHandle>,
        /// Panic payload, when printable
        message: String,
    },
}

impl CallbackError {
    /// Kind of work that failed
    pub fn kind(&self) -> TaskKind {
        match self {
            CallbackError::Failed { kind, .. } | CallbackError::Panicked { kind, .. } => *kind,
        }
    }

    /// Handle of the failed task, if it had one (microtasks do not)
    pub fn handle(&self) -> Option<TaskHandle> {
        match self {
            CallbackError::Failed { handle, .. } | CallbackError::Panicked { handle, .. } => {
                *handle
            }
        }
    }

    /// Whether the callback panicked rather than returning an error
    pub fn is_panic(&self) -> bool {
        matches!(self, CallbackError::Panicked { .. })
    }
}

/// Values a callback may return.
///
/// Callbacks either return `()` or a `Result` whose error renders with
/// `Display`; an `Err` is reported as [`CallbackError::Failed`].
pub trait CallbackReturn {
    /// Collapse into the loop's internal form
    fn into_result(self) -> Result<(), String>;
}

impl CallbackReturn for () {
    fn into_result(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: Display> CallbackReturn for Result<(), E> {
    fn into_result(self) -> Result<(), String> {
        self.map_err(|e| e.to_string())
    }
}

/// Render a panic payload the way the standard panic hook does.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
