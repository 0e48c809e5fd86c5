//! Jobs handed to the worker pool.

use ember_sdk::{Payload, TaskHandle};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Lifecycle of a submitted job
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum JobState {
    /// Waiting in the pool queue
    Queued,
    /// Picked up by a worker
    Running,
    /// Compute function returned or panicked
    Done,
    /// Cancelled before a worker picked it up
    Cancelled,
}

/// State shared between the loop thread and the worker that runs a job.
///
/// The only contested transition is `Queued`: the worker moves it to
/// `Running`, the loop moves it to `Cancelled`, and whoever wins the CAS
/// decides whether the compute function runs at all.
#[derive(Debug)]
pub(crate) struct JobTicket {
    state: AtomicU8,
}

impl JobTicket {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(QUEUED),
        })
    }

    /// Claim the job for a worker. Fails if it was cancelled first.
    pub(crate) fn try_start(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Cancel the job if no worker has claimed it yet.
    pub(crate) fn try_cancel(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.state.store(DONE, Ordering::Release);
    }

    pub(crate) fn state(&self) -> JobState {
        match self.state.load(Ordering::Acquire) {
            QUEUED => JobState::Queued,
            RUNNING => JobState::Running,
            DONE => JobState::Done,
            _ => JobState::Cancelled,
        }
    }
}

/// A unit of work for the pool
pub(crate) struct Job {
    pub handle: TaskHandle,
    pub ticket: Arc<JobTicket>,
    pub run: Box<dyn FnOnce() -> Payload + Send>,
}

impl Job {
    pub(crate) fn new<F>(handle: TaskHandle, ticket: Arc<JobTicket>, run: F) -> Self
    where
        F: FnOnce() -> Payload + Send + 'static,
    {
        Self {
            handle,
            ticket,
            run: Box::new(run),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_wins_race() {
        let ticket = JobTicket::new();
        assert!(ticket.try_start());
        assert!(!ticket.try_cancel());
        assert_eq!(ticket.state(), JobState::Running);
        ticket.finish();
        assert_eq!(ticket.state(), JobState::Done);
    }

    #[test]
    fn test_cancel_wins_race() {
        let ticket = JobTicket::new();
        assert!(ticket.try_cancel());
        assert!(!ticket.try_start());
        assert_eq!(ticket.state(), JobState::Cancelled);
    }
}
