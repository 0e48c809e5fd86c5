//! Loop configuration.

use crate::clock::{Clock, SystemClock};
use crate::error::CallbackError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hook receiving every error raised by a scheduled callback.
///
/// Runs on the loop thread. The hook must not block.
pub type ErrorHook = Box<dyn FnMut(&CallbackError)>;

/// Default time shutdown waits for in-flight worker jobs
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for an [`EventLoop`](crate::EventLoop).
pub struct LoopOptions {
    /// Number of worker threads (0 = number of logical CPUs)
    pub worker_count: usize,

    /// How long shutdown waits for running worker jobs
    pub shutdown_timeout: Duration,

    /// Receives callback errors; `None` logs them at `error` level
    pub on_unhandled_error: Option<ErrorHook>,

    /// Time source for timer deadlines
    pub clock: Arc<dyn Clock>,

    /// Worker thread name prefix; threads are named `{prefix}-{index}`
    pub thread_name: String,
}

impl LoopOptions {
    /// Set the worker thread count
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Install an error hook
    pub fn on_unhandled_error(mut self, hook: impl FnMut(&CallbackError) + 'static) -> Self {
        self.on_unhandled_error = Some(Box::new(hook));
        self
    }

    /// Use a different clock
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Set the worker thread name prefix
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Worker count with the `0 = CPU count` rule applied
    pub(crate) fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            on_unhandled_error: None,
            clock: Arc::new(SystemClock),
            thread_name: "ember-worker".to_string(),
        }
    }
}

impl fmt::Debug for LoopOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopOptions")
            .field("worker_count", &self.worker_count)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("on_unhandled_error", &self.on_unhandled_error.is_some())
            .field("clock_is_virtual", &self.clock.is_virtual())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}
