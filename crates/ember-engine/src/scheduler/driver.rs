//! Event loop driver
//!
//! One iteration runs the phases in a fixed order:
//!
//! 1. timers whose deadline passed before the phase started
//! 2. completions and remote calls that were in the inbox when the phase
//!    started
//! 3. poll: the only point where the loop sleeps, bounded by the next timer
//!    deadline
//! 4. the immediates queued before the phase started
//! 5. the idle check that ends `run_until_idle`
//!
//! The microtask queue is drained to exhaustion after every unit of work in
//! every phase.

use crate::error::{CallbackError, CallbackReturn, SchedulerError, SchedulerResult};
use crate::options::{ErrorHook, LoopOptions};
use crate::pool::{JobFuture, WorkerPool};
use crate::scheduler::immediate::ImmediateQueue;
use crate::scheduler::inbox::{inbox, Envelope, LoopHandle};
use crate::scheduler::microtask::MicrotaskQueue;
use crate::scheduler::pending::CompletionTable;
use crate::scheduler::registry::CancellationRegistry;
use crate::scheduler::scope::{Core, Current, Scope};
use crate::scheduler::task::{RepeatingCallback, TimerCallback, Work};
use crate::scheduler::TaskKind;
use crate::scheduler::timer::{deadline_after, TimerStore, MIN_INTERVAL};
use crate::sync::SharedBuffer;
use crossbeam::channel::Receiver;
use ember_sdk::{CompletionError, CompletionEvent, CompletionSender, Outcome, TaskHandle};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Where the driver currently is.
///
/// The owner of the loop only observes `Idle` and `Shutdown` between runs.
/// Callbacks see `Draining` through [`Scope::state`], and other threads see
/// `Polling` through [`LoopHandle::state`] while the loop is blocked.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// Not running, or returned from a run
    Idle = 0,
    /// Blocked in the poll phase
    Polling = 1,
    /// Executing callbacks
    Draining = 2,
    /// Shut down; all further scheduling fails
    Shutdown = 3,
}

impl LoopState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LoopState::Polling,
            2 => LoopState::Draining,
            3 => LoopState::Shutdown,
            _ => LoopState::Idle,
        }
    }
}

/// Counters accumulated over the loop's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Iterations started
    pub iterations: u64,
    /// Timer callbacks run, counting each fire of a repeating timer
    pub timers_fired: u64,
    /// Immediate callbacks run
    pub immediates_run: u64,
    /// Microtasks run
    pub microtasks_run: u64,
    /// Worker and I/O completions delivered to their callbacks
    pub completions: u64,
    /// Callbacks posted through a `LoopHandle` and run
    pub remote_calls: u64,
    /// Callbacks that returned an error or panicked
    pub callback_errors: u64,
    /// Successful cancellations
    pub cancelled: u64,
    /// Completions dropped because their handle was no longer pending
    pub dropped_completions: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RunMode {
    UntilIdle,
    Forever,
}

/// A single-threaded cooperative event loop.
///
/// Owns its queues and worker pool; any number of loops can coexist in one
/// process. Work scheduled directly on the loop before a run behaves exactly
/// like work scheduled from a callback.
pub struct EventLoop {
    core: Core,
    inbox_rx: Receiver<Envelope>,
    /// Envelopes received during poll, handled by the next completions phase
    backlog: VecDeque<Envelope>,
    /// Number of the run in progress, matched against `Envelope::Stop`
    run_id: u64,
    on_unhandled_error: ErrorHook,
    shutdown_timeout: Duration,
}

impl EventLoop {
    /// Create a loop with default options.
    pub fn new() -> SchedulerResult<Self> {
        Self::with_options(LoopOptions::default())
    }

    /// Create a loop, spawning its worker threads.
    pub fn with_options(options: LoopOptions) -> SchedulerResult<Self> {
        let worker_count = options.resolved_worker_count();
        let LoopOptions {
            shutdown_timeout,
            on_unhandled_error,
            clock,
            thread_name,
            ..
        } = options;

        let (sender, inbox_rx) = inbox();
        let pool = WorkerPool::start(worker_count, &thread_name, sender.raw())?;
        let registry = CancellationRegistry::new();
        log::debug!(
            "event loop {} created with {} worker(s)",
            registry.loop_id(),
            pool.size()
        );

        Ok(Self {
            core: Core {
                clock,
                registry,
                timers: TimerStore::new(),
                immediates: ImmediateQueue::new(),
                microtasks: MicrotaskQueue::new(),
                pending: CompletionTable::new(),
                pool,
                inbox: sender,
                accepting: true,
                stop_requested: false,
                current: None,
                stats: LoopStats::default(),
            },
            inbox_rx,
            backlog: VecDeque::new(),
            run_id: 0,
            on_unhandled_error: on_unhandled_error.unwrap_or_else(default_error_hook),
            shutdown_timeout,
        })
    }

    /// Scope over this loop, for scheduling outside of any callback
    pub fn scope(&mut self) -> Scope<'_> {
        Scope::new(&mut self.core)
    }

    /// See [`Scope::schedule_timer`]
    pub fn schedule_timer<F, R>(
        &mut self,
        delay: Duration,
        repeating: bool,
        callback: F,
    ) -> SchedulerResult<TaskHandle>
    where
        F: FnMut(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope().schedule_timer(delay, repeating, callback)
    }

    /// See [`Scope::set_timeout`]
    pub fn set_timeout<F, R>(&mut self, delay: Duration, callback: F) -> SchedulerResult<TaskHandle>
    where
        F: FnOnce(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope().set_timeout(delay, callback)
    }

    /// See [`Scope::set_interval`]
    pub fn set_interval<F, R>(&mut self, interval: Duration, callback: F) -> SchedulerResult<TaskHandle>
    where
        F: FnMut(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope().set_interval(interval, callback)
    }

    /// See [`Scope::schedule_immediate`]
    pub fn schedule_immediate<F, R>(&mut self, callback: F) -> SchedulerResult<TaskHandle>
    where
        F: FnOnce(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope().schedule_immediate(callback)
    }

    /// See [`Scope::enqueue_microtask`]
    pub fn enqueue_microtask<F, R>(&mut self, callback: F) -> SchedulerResult<()>
    where
        F: FnOnce(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope().enqueue_microtask(callback)
    }

    /// See [`Scope::cancel`]
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.core.cancel(handle).is_ok()
    }

    /// See [`Scope::try_cancel`]
    pub fn try_cancel(&mut self, handle: TaskHandle) -> SchedulerResult<()> {
        self.core.cancel(handle)
    }

    /// See [`Scope::is_pending`]
    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.core.registry.is_live(handle)
    }

    /// See [`Scope::submit_worker_job`]
    pub fn submit_worker_job<I, O, F>(&mut self, compute: F, input: I) -> SchedulerResult<JobFuture<O>>
    where
        F: FnOnce(I) -> O + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
    {
        self.scope().submit_worker_job(compute, input)
    }

    /// See [`Scope::submit_worker_job_with`]
    pub fn submit_worker_job_with<I, O, F, C, R>(
        &mut self,
        compute: F,
        input: I,
        on_complete: C,
    ) -> SchedulerResult<TaskHandle>
    where
        F: FnOnce(I) -> O + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
        C: FnOnce(&mut Scope<'_>, Result<O, CompletionError>) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope().submit_worker_job_with(compute, input, on_complete)
    }

    /// See [`Scope::submit_shared_job`]
    pub fn submit_shared_job<I, O, F, C, R>(
        &mut self,
        compute: F,
        buffer: SharedBuffer,
        input: I,
        on_complete: C,
    ) -> SchedulerResult<TaskHandle>
    where
        F: FnOnce(&SharedBuffer, I) -> O + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
        C: FnOnce(&mut Scope<'_>, Result<O, CompletionError>) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope()
            .submit_shared_job(compute, buffer, input, on_complete)
    }

    /// See [`Scope::register_io`]
    pub fn register_io<C, R>(&mut self, on_complete: C) -> SchedulerResult<TaskHandle>
    where
        C: FnOnce(&mut Scope<'_>, Outcome) -> R + 'static,
        R: CallbackReturn,
    {
        self.scope().register_io(on_complete)
    }

    /// Sender an I/O collaborator uses to post completions to this loop.
    ///
    /// Posting through it fails with `PostError::Closed` after shutdown.
    pub fn register_io_completion_source(&self) -> CompletionSender {
        CompletionSender::new(std::sync::Arc::new(self.core.inbox.clone()))
    }

    /// Thread-safe handle for posting work, waking or stopping the loop
    pub fn handle(&self) -> LoopHandle {
        LoopHandle::new(self.core.inbox.clone())
    }

    /// Current state. Outside of a run this is `Idle` or `Shutdown`; see
    /// [`LoopState`] for where the other states can be observed.
    pub fn state(&self) -> LoopState {
        self.core.inbox.state()
    }

    /// Counters since creation
    pub fn stats(&self) -> LoopStats {
        self.core.stats.clone()
    }

    /// Live tasks of one kind
    pub fn pending_count(&self, kind: TaskKind) -> usize {
        self.core.registry.count(kind)
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.core.pool.size()
    }

    /// Run iterations until nothing is queued, no timer is pending, and no
    /// worker job or I/O operation is outstanding.
    ///
    /// Callback failures are reported to the error hook and never end the
    /// run. Fails only when called after [`shutdown`](Self::shutdown).
    pub fn run_until_idle(&mut self) -> SchedulerResult<()> {
        self.run(RunMode::UntilIdle)
    }

    /// Run until stopped through [`Scope::stop`] or [`LoopHandle::stop`],
    /// blocking in the poll phase whenever there is nothing to do.
    pub fn run_forever(&mut self) -> SchedulerResult<()> {
        self.run(RunMode::Forever)
    }

    /// Run every queued microtask, including those queued while draining.
    /// Returns how many ran.
    pub fn drain_microtasks(&mut self) -> usize {
        let mut ran = 0;
        while let Some(callback) = self.core.microtasks.pop() {
            self.core.stats.microtasks_run += 1;
            self.execute(Work::Microtask(callback));
            ran += 1;
        }
        ran
    }

    fn run(&mut self, mode: RunMode) -> SchedulerResult<()> {
        if self.state() == LoopState::Shutdown {
            return Err(SchedulerError::ShutDown);
        }
        self.core.stop_requested = false;
        self.run_id = self.core.inbox.begin_run();
        self.core.inbox.set_state(LoopState::Draining);

        self.drain_microtasks();
        while !self.core.stop_requested {
            self.core.stats.iterations += 1;

            self.run_timers();
            if self.core.stop_requested {
                break;
            }
            self.run_completions();
            if self.core.stop_requested {
                break;
            }
            self.poll(mode);
            if self.core.stop_requested {
                break;
            }
            self.run_immediates();

            if mode == RunMode::UntilIdle && self.is_idle() {
                log::trace!(
                    "loop {} idle after {} iteration(s)",
                    self.core.registry.loop_id(),
                    self.core.stats.iterations
                );
                break;
            }
        }

        self.core.inbox.set_state(LoopState::Idle);
        Ok(())
    }

    fn run_timers(&mut self) {
        let now = self.core.clock.now();
        let boundary = self.core.timers.phase_boundary();

        while let Some((handle, entry)) = self.core.timers.pop_due(now, boundary) {
            let fired_at = self.core.clock.now();
            self.core.stats.timers_fired += 1;
            log::trace!(
                "timer {} fired {:?} after its deadline",
                handle,
                fired_at.saturating_duration_since(entry.deadline)
            );

            let rearm = self.execute(Work::Timer {
                handle,
                callback: entry.callback,
            });
            // A timer that cancelled itself is no longer registered
            if let Some(callback) = rearm {
                if self.core.registry.is_live(handle) {
                    let interval = entry.interval.unwrap_or(MIN_INTERVAL);
                    self.core.timers.insert(
                        handle,
                        deadline_after(fired_at, interval),
                        Some(interval),
                        entry.scheduled_at,
                        TimerCallback::Repeating(callback),
                    );
                }
            }

            self.drain_microtasks();
            if self.core.stop_requested {
                return;
            }
        }
    }

    fn run_completions(&mut self) {
        let budget = self.backlog.len() + self.inbox_rx.len();

        for _ in 0..budget {
            let envelope = match self.backlog.pop_front() {
                Some(envelope) => envelope,
                None => match self.inbox_rx.try_recv() {
                    Ok(envelope) => envelope,
                    Err(_) => break,
                },
            };

            match envelope {
                Envelope::Completion(event) => self.deliver(event),
                Envelope::Call(call) => {
                    self.core.stats.remote_calls += 1;
                    self.execute(Work::Remote(call));
                }
                Envelope::Wake => continue,
                Envelope::Stop(run) => self.accept_stop(run),
            }

            self.drain_microtasks();
            if self.core.stop_requested {
                return;
            }
        }
    }

    fn deliver(&mut self, event: CompletionEvent) {
        let CompletionEvent { handle, outcome } = event;
        let Some(pending) = self.core.pending.remove(handle) else {
            self.core.stats.dropped_completions += 1;
            log::warn!("dropping completion for {}: not pending on this loop", handle);
            return;
        };

        self.core.stats.completions += 1;
        self.execute(Work::Completion {
            handle,
            kind: pending.kind,
            callback: pending.callback,
            outcome,
        });
    }

    /// Block on the inbox when there is nothing runnable right now.
    fn poll(&mut self, mode: RunMode) {
        if !self.core.immediates.is_empty()
            || !self.core.microtasks.is_empty()
            || !self.backlog.is_empty()
            || !self.inbox_rx.is_empty()
        {
            return;
        }

        let now = self.core.clock.now();
        let next = self.core.timers.next_deadline();
        if next.is_some_and(|deadline| deadline <= now) {
            return;
        }
        if mode == RunMode::UntilIdle && next.is_none() && self.core.pending.is_empty() {
            return;
        }

        if self.core.clock.is_virtual() {
            if let Some(deadline) = next {
                log::trace!("advancing virtual clock by {:?}", deadline - now);
                self.core.clock.advance_to(deadline);
                return;
            }
        }

        self.core.inbox.set_state(LoopState::Polling);
        let received = match next {
            Some(deadline) => self.inbox_rx.recv_timeout(deadline - now).ok(),
            None => self.inbox_rx.recv().ok(),
        };
        self.core.inbox.set_state(LoopState::Draining);

        match received {
            Some(Envelope::Stop(run)) => self.accept_stop(run),
            Some(Envelope::Wake) | None => {}
            Some(envelope) => self.backlog.push_back(envelope),
        }
    }

    fn accept_stop(&mut self, run: u64) {
        if run == self.run_id {
            self.core.stop_requested = true;
        } else {
            log::trace!("ignoring stop sent before run {}", self.run_id);
        }
    }

    fn run_immediates(&mut self) {
        let Some(boundary) = self.core.immediates.begin_batch() else {
            return;
        };

        while let Some((handle, callback)) = self.core.immediates.pop_until(boundary) {
            self.core.stats.immediates_run += 1;
            self.execute(Work::Immediate { handle, callback });

            self.drain_microtasks();
            if self.core.stop_requested {
                return;
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.core.registry.len() == 0
            && self.core.microtasks.is_empty()
            && self.backlog.is_empty()
            && self.inbox_rx.is_empty()
    }

    /// Run one unit of work and report its failure, if any.
    ///
    /// The handle is released once the callback returns, except for a
    /// repeating timer whose body comes back for re-arming.
    fn execute(&mut self, work: Work) -> Option<RepeatingCallback> {
        let handle = work.handle();
        let repeating = matches!(
            work,
            Work::Timer {
                callback: TimerCallback::Repeating(_),
                ..
            }
        );
        self.core.current = handle.map(|handle| Current { handle, repeating });

        let ran = work.run(&mut Scope::new(&mut self.core));
        self.core.current = None;

        if let Some(error) = ran.error {
            self.report(error);
        }
        match ran.rearm {
            Some(callback) => Some(callback),
            None => {
                if let Some(handle) = handle {
                    self.core.registry.release(handle);
                }
                None
            }
        }
    }

    fn report(&mut self, error: CallbackError) {
        self.core.stats.callback_errors += 1;
        let hook = &mut self.on_unhandled_error;
        if panic::catch_unwind(AssertUnwindSafe(|| hook(&error))).is_err() {
            log::error!("error hook panicked while handling: {}", error);
        }
    }

    /// Stop accepting work, drop everything pending without running it and
    /// release the worker pool.
    ///
    /// Queued jobs are cancelled; running jobs get up to `timeout` to finish
    /// before their threads are abandoned, which is reported as
    /// [`SchedulerError::ShutdownTimeout`]. Calling it again does nothing.
    pub fn shutdown(&mut self, timeout: Duration) -> SchedulerResult<()> {
        if self.state() == LoopState::Shutdown {
            return Ok(());
        }
        self.core.accepting = false;
        self.core.inbox.close();

        let timers = self.core.timers.clear();
        let immediates = self.core.immediates.clear();
        let microtasks = self.core.microtasks.clear();
        let mut pending = 0;
        for (_, entry) in self.core.pending.drain() {
            if let Some(ticket) = &entry.ticket {
                ticket.try_cancel();
            }
            pending += 1;
        }
        self.core.registry.clear();

        let abandoned = self.core.pool.shutdown(timeout);

        // Results and calls that raced with shutdown are dropped unrun
        self.backlog.clear();
        while self.inbox_rx.try_recv().is_ok() {}

        self.core.inbox.set_state(LoopState::Shutdown);
        log::debug!(
            "event loop {} shut down: dropped {} timer(s), {} immediate(s), {} microtask(s), {} pending completion(s)",
            self.core.registry.loop_id(),
            timers,
            immediates,
            microtasks,
            pending
        );

        if abandoned > 0 {
            log::warn!(
                "event loop {} abandoned {} worker thread(s) after {:?}",
                self.core.registry.loop_id(),
                abandoned,
                timeout
            );
            return Err(SchedulerError::ShutdownTimeout { abandoned });
        }
        Ok(())
    }
}

fn default_error_hook() -> ErrorHook {
    Box::new(|error| log::error!("unhandled callback error: {}", error))
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = self.shutdown(self.shutdown_timeout);
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("loop_id", &self.core.registry.loop_id())
            .field("state", &self.state())
            .field("timers", &self.core.timers.len())
            .field("immediates", &self.core.immediates.len())
            .field("microtasks", &self.core.microtasks.len())
            .field("pending", &self.core.pending.len())
            .finish()
    }
}
