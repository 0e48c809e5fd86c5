//! Ember Engine
//!
//! A single-threaded cooperative event loop with:
//! - **Microtasks** drained to exhaustion after every unit of work
//! - **Timers** (one-shot and repeating) ordered by deadline
//! - **Immediates** run after each poll
//! - **Worker pool** for CPU-bound jobs, results delivered back on the loop
//! - **Completion inbox** for external I/O collaborators and other threads
//!
//! # Example
//!
//! ```rust,ignore
//! use ember_engine::{EventLoop, LoopOptions};
//! use std::time::Duration;
//!
//! let mut event_loop = EventLoop::with_options(LoopOptions::default().worker_count(2))?;
//!
//! event_loop.set_timeout(Duration::from_millis(10), |scope| {
//!     scope.enqueue_microtask(|_| println!("after the timer"))?;
//!     Ok::<_, ember_engine::SchedulerError>(())
//! })?;
//!
//! let sum = event_loop.submit_worker_job(|v: Vec<u64>| v.iter().sum::<u64>(), vec![1, 2, 3])?;
//! event_loop.run_until_idle()?;
//! assert_eq!(futures::executor::block_on(sum), Ok(6));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Modules
// ============================================================================

/// Time sources
pub mod clock;

/// Error types
pub mod error;

/// Loop configuration
pub mod options;

/// Worker pool and job futures
mod pool;

/// Loop-owned queues and the driver
pub mod scheduler;

/// Shared memory for worker jobs
pub mod sync;

// ============================================================================
// Re-exports
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CallbackError, CallbackReturn, SchedulerError, SchedulerResult};
pub use options::{ErrorHook, LoopOptions, DEFAULT_SHUTDOWN_TIMEOUT};
pub use pool::JobFuture;
pub use scheduler::{EventLoop, LoopHandle, LoopState, LoopStats, Scope, TaskKind, MIN_INTERVAL};
pub use sync::{SharedBuffer, WaitResult};

pub use ember_sdk::{
    CompletionError, CompletionEvent, CompletionSender, CompletionSink, Outcome, Payload,
    PostError, TaskHandle,
};
