//! Future side of a worker job.
//!
//! `JobFuture` is resolved on the loop thread during the completions phase,
//! after which it can be awaited from anywhere: inside another executor, in
//! a loop callback via [`JobFuture::try_take`], or by blocking on it.

use ember_sdk::{CompletionError, TaskHandle};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct Slot<O> {
    result: Option<Result<O, CompletionError>>,
    waker: Option<Waker>,
}

/// Result of a job submitted with
/// [`Scope::submit_worker_job`](crate::Scope::submit_worker_job).
///
/// Resolves to the compute function's output, to
/// [`CompletionError::Panicked`] if it panicked, or to
/// [`CompletionError::Cancelled`] if the job was cancelled or the loop shut
/// down before delivering it.
pub struct JobFuture<O> {
    handle: TaskHandle,
    slot: Arc<Mutex<Slot<O>>>,
}

impl<O> JobFuture<O> {
    /// Handle of the job, usable with `cancel`
    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// Whether the result has been delivered and not yet taken
    pub fn is_ready(&self) -> bool {
        self.slot.lock().result.is_some()
    }

    /// Take the result without polling, if it has been delivered.
    pub fn try_take(&mut self) -> Option<Result<O, CompletionError>> {
        self.slot.lock().result.take()
    }
}

impl<O> Future for JobFuture<O> {
    type Output = Result<O, CompletionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match slot.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<O> std::fmt::Debug for JobFuture<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFuture")
            .field("handle", &self.handle)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Loop-side half of a [`JobFuture`].
///
/// Dropping an unresolved resolver settles the future with `Cancelled`, so
/// a cancelled job or a shutdown never leaves an awaiting task hanging.
pub(crate) struct JobResolver<O> {
    slot: Option<Arc<Mutex<Slot<O>>>>,
}

impl<O> JobResolver<O> {
    pub(crate) fn resolve(mut self, result: Result<O, CompletionError>) {
        if let Some(slot) = self.slot.take() {
            fill(&slot, result);
        }
    }
}

impl<O> Drop for JobResolver<O> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            fill(&slot, Err(CompletionError::Cancelled));
        }
    }
}

fn fill<O>(slot: &Mutex<Slot<O>>, result: Result<O, CompletionError>) {
    let waker = {
        let mut slot = slot.lock();
        slot.result = Some(result);
        slot.waker.take()
    };
    if let Some(waker) = waker {
        waker.wake();
    }
}

pub(crate) fn job_channel<O>(handle: TaskHandle) -> (JobFuture<O>, JobResolver<O>) {
    let slot = Arc::new(Mutex::new(Slot {
        result: None,
        waker: None,
    }));
    (
        JobFuture {
            handle,
            slot: slot.clone(),
        },
        JobResolver { slot: Some(slot) },
    )
}
