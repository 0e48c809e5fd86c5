//! Worker pool
//!
//! A fixed set of named threads pulling jobs from one FIFO channel. A worker
//! never touches loop state: it runs the compute function and posts the
//! outcome to the loop inbox, where the completions phase picks it up.

mod future;
mod job;

pub use future::JobFuture;
pub(crate) use future::job_channel;
pub(crate) use job::{Job, JobTicket};

use crate::error::{panic_message, SchedulerError, SchedulerResult};
use crate::scheduler::Envelope;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use ember_sdk::{CompletionError, CompletionEvent};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often an idle worker rechecks the shutdown flag
const IDLE_POLL: Duration = Duration::from_millis(100);

pub(crate) struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `count` workers named `{name}-{index}`, all posting to `inbox`.
    pub(crate) fn start(count: usize, name: &str, inbox: Sender<Envelope>) -> SchedulerResult<Self> {
        let (job_tx, job_rx) = channel::unbounded();
        let mut pool = Self {
            job_tx: Some(job_tx),
            workers: Vec::with_capacity(count),
            shutdown: Arc::new(AtomicBool::new(false)),
        };

        for index in 0..count {
            let rx = job_rx.clone();
            let inbox = inbox.clone();
            let shutdown = pool.shutdown.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker_loop(rx, inbox, shutdown));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown(Duration::ZERO);
                    return Err(SchedulerError::WorkerSpawn(e));
                }
            }
        }

        log::debug!("worker pool started with {} thread(s)", count);
        Ok(pool)
    }

    /// Queue a job. Fails once the pool has shut down.
    pub(crate) fn submit(&self, job: Job) -> SchedulerResult<()> {
        let tx = self.job_tx.as_ref().ok_or(SchedulerError::ShutDown)?;
        tx.send(job).map_err(|_| SchedulerError::ShutDown)
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting jobs and join the workers, waiting at most `timeout`
    /// in total. A timeout too large to add to the current time waits for
    /// as long as the workers take. Returns how many threads were left
    /// detached.
    pub(crate) fn shutdown(&mut self, timeout: Duration) -> usize {
        self.shutdown.store(true, Ordering::Release);
        // Dropping the sender disconnects idle workers right away
        self.job_tx.take();

        let deadline = Instant::now().checked_add(timeout);
        let mut abandoned = 0;
        for handle in self.workers.drain(..) {
            if !join_with_timeout(handle, deadline) {
                abandoned += 1;
            }
        }
        abandoned
    }
}

/// Join a thread before `deadline`, detaching it if still busy.
fn join_with_timeout(handle: JoinHandle<()>, deadline: Option<Instant>) -> bool {
    let Some(deadline) = deadline else {
        let _ = handle.join();
        return true;
    };
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        if Instant::now() >= deadline {
            log::warn!(
                "detaching worker {} still running at shutdown",
                handle.thread().name().unwrap_or("<unnamed>")
            );
            drop(handle);
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn worker_loop(jobs: Receiver<Job>, inbox: Sender<Envelope>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        let job = match jobs.recv_timeout(IDLE_POLL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if !job.ticket.try_start() {
            log::trace!("skipping cancelled job {}", job.handle);
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(job.run))
            .map_err(|payload| CompletionError::Panicked(panic_message(payload.as_ref())));
        job.ticket.finish();

        if let Err(e) = &outcome {
            log::debug!("job {} failed: {}", job.handle, e);
        }

        // The loop may already be gone; the result is simply dropped then
        let _ = inbox.send(Envelope::Completion(CompletionEvent {
            handle: job.handle,
            outcome,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_sdk::{Payload, TaskHandle};

    fn recv_completion(rx: &Receiver<Envelope>) -> CompletionEvent {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Envelope::Completion(event) => event,
            _ => panic!("expected a completion"),
        }
    }

    #[test]
    fn test_runs_job_and_posts_result() {
        let (tx, rx) = channel::unbounded();
        let mut pool = WorkerPool::start(2, "test-pool", tx).unwrap();
        assert_eq!(pool.size(), 2);

        let handle = TaskHandle::from_raw(1, 1);
        pool.submit(Job::new(handle, JobTicket::new(), || Payload::new(6 * 7)))
            .unwrap();

        let event = recv_completion(&rx);
        assert_eq!(event.handle, handle);
        assert_eq!(event.outcome.unwrap().take::<i32>(), Ok(42));
        assert_eq!(pool.shutdown(Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_panic_becomes_error() {
        let (tx, rx) = channel::unbounded();
        let mut pool = WorkerPool::start(1, "test-pool", tx).unwrap();

        let handle = TaskHandle::from_raw(1, 2);
        pool.submit(Job::new(handle, JobTicket::new(), || panic!("bad input")))
            .unwrap();

        let event = recv_completion(&rx);
        assert!(matches!(
            event.outcome,
            Err(CompletionError::Panicked(ref m)) if m == "bad input"
        ));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_cancelled_job_never_runs() {
        let (tx, rx) = channel::unbounded();
        let mut pool = WorkerPool::start(1, "test-pool", tx).unwrap();

        let ticket = JobTicket::new();
        assert!(ticket.try_cancel());
        pool.submit(Job::new(TaskHandle::from_raw(1, 3), ticket, || Payload::new(())))
            .unwrap();
        pool.submit(Job::new(TaskHandle::from_raw(1, 4), JobTicket::new(), || {
            Payload::new(())
        }))
        .unwrap();

        // Only the second job reports back
        assert_eq!(recv_completion(&rx).handle, TaskHandle::from_raw(1, 4));
        pool.shutdown(Duration::from_secs(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_submit_after_shutdown() {
        let (tx, _rx) = channel::unbounded();
        let mut pool = WorkerPool::start(1, "test-pool", tx).unwrap();
        pool.shutdown(Duration::from_secs(1));
        let result = pool.submit(Job::new(TaskHandle::from_raw(1, 5), JobTicket::new(), || {
            Payload::new(())
        }));
        assert!(matches!(result, Err(SchedulerError::ShutDown)));
    }

    #[test]
    fn test_stuck_worker_is_abandoned() {
        let (tx, _rx) = channel::unbounded();
        let mut pool = WorkerPool::start(1, "test-pool", tx).unwrap();
        pool.submit(Job::new(TaskHandle::from_raw(1, 6), JobTicket::new(), || {
            thread::sleep(Duration::from_millis(500));
            Payload::new(())
        }))
        .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.shutdown(Duration::from_millis(20)), 1);
    }

    #[test]
    fn test_unrepresentable_timeout_joins_busy_worker() {
        let (tx, rx) = channel::unbounded();
        let mut pool = WorkerPool::start(1, "test-pool", tx).unwrap();
        pool.submit(Job::new(TaskHandle::from_raw(1, 7), JobTicket::new(), || {
            thread::sleep(Duration::from_millis(50));
            Payload::new(())
        }))
        .unwrap();
        thread::sleep(Duration::from_millis(10));

        assert_eq!(pool.shutdown(Duration::MAX), 0);
        assert_eq!(recv_completion(&rx).handle, TaskHandle::from_raw(1, 7));
    }
}
