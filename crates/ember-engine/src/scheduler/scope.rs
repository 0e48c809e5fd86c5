//! Loop state shared by the driver and running callbacks.
//!
//! `Core` holds every structure the driver owns. Callbacks reach it through
//! a [`Scope`], which is the only way to schedule or cancel work while the
//! loop is running.

use crate::clock::Clock;
use crate::error::{CallbackReturn, SchedulerError, SchedulerResult};
use crate::pool::{job_channel, Job, JobFuture, JobTicket, WorkerPool};
use crate::scheduler::immediate::ImmediateQueue;
use crate::scheduler::inbox::{InboxSender, LoopHandle};
use crate::scheduler::microtask::MicrotaskQueue;
use crate::scheduler::pending::{CompletionTable, PendingCompletion};
use crate::scheduler::registry::CancellationRegistry;
use crate::scheduler::task::{
    boxed, boxed_completion, boxed_repeating, CompletionCallback, TimerCallback,
};
use crate::scheduler::timer::{deadline_after, TimerStore, MIN_INTERVAL};
use crate::scheduler::{LoopState, LoopStats, TaskKind};
use crate::sync::SharedBuffer;
use ember_sdk::{CompletionError, CompletionSender, Outcome, Payload, TaskHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The running task, while a callback executes
pub(crate) struct Current {
    pub handle: TaskHandle,
    pub repeating: bool,
}

pub(crate) struct Core {
    pub clock: Arc<dyn Clock>,
    pub registry: CancellationRegistry,
    pub timers: TimerStore,
    pub immediates: ImmediateQueue,
    pub microtasks: MicrotaskQueue,
    pub pending: CompletionTable,
    pub pool: WorkerPool,
    pub inbox: InboxSender,
    pub accepting: bool,
    pub stop_requested: bool,
    pub current: Option<Current>,
    pub stats: LoopStats,
}

impl Core {
    fn ensure_accepting(&self) -> SchedulerResult<()> {
        if self.accepting {
            Ok(())
        } else {
            Err(SchedulerError::ShutDown)
        }
    }

    fn add_timer(
        &mut self,
        delay: Duration,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> SchedulerResult<TaskHandle> {
        self.ensure_accepting()?;
        let now = self.clock.now();
        let handle = self.registry.register(TaskKind::Timer);
        let interval = interval.map(|i| i.max(MIN_INTERVAL));
        self.timers
            .insert(handle, deadline_after(now, delay), interval, now, callback);
        Ok(handle)
    }

    /// Queue `run` on the pool under an already registered handle.
    fn queue_job<F>(
        &mut self,
        handle: TaskHandle,
        run: F,
        on_complete: CompletionCallback,
    ) -> SchedulerResult<()>
    where
        F: FnOnce() -> Payload + Send + 'static,
    {
        let ticket = JobTicket::new();
        self.pending.insert(
            handle,
            PendingCompletion {
                kind: TaskKind::WorkerJob,
                callback: on_complete,
                ticket: Some(ticket.clone()),
            },
        );
        if let Err(e) = self.pool.submit(Job::new(handle, ticket, run)) {
            self.pending.remove(handle);
            self.registry.release(handle);
            return Err(e);
        }
        Ok(())
    }

    /// Cancel a live handle. Fails for unknown handles and tasks that
    /// already started.
    pub(crate) fn cancel(&mut self, handle: TaskHandle) -> SchedulerResult<()> {
        let kind = self.registry.lookup(handle).inspect_err(|_| {
            if !self.registry.was_issued(handle) {
                log::trace!("rejecting handle {} not issued by this loop", handle);
            }
        })?;
        let cancelled = match kind {
            TaskKind::Timer => {
                self.timers.remove(handle).is_some() || self.cancel_current_repeating(handle)
            }
            TaskKind::Immediate => self.immediates.remove(handle).is_some(),
            TaskKind::WorkerJob => {
                let claimed = match self.pending.get(handle).and_then(|p| p.ticket.as_ref()) {
                    Some(ticket) if ticket.try_cancel() => true,
                    Some(ticket) => {
                        log::trace!("job {} not cancellable: {:?}", handle, ticket.state());
                        false
                    }
                    None => false,
                };
                // Dropping the entry settles a JobFuture with Cancelled
                claimed && self.pending.remove(handle).is_some()
            }
            TaskKind::Io => self.pending.remove(handle).is_some(),
            TaskKind::Microtask | TaskKind::Remote => false,
        };

        if !cancelled {
            return Err(SchedulerError::AlreadyStarted(handle));
        }
        self.registry.release(handle);
        self.stats.cancelled += 1;
        log::trace!("cancelled {} {}", kind, handle);
        Ok(())
    }

    /// A repeating timer may cancel itself while running; a one-shot may not.
    fn cancel_current_repeating(&self, handle: TaskHandle) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| current.handle == handle && current.repeating)
    }
}

/// Access to the loop from inside a callback.
///
/// Every callback receives `&mut Scope`. Work scheduled through it follows
/// the same rules as work scheduled on the [`EventLoop`](crate::EventLoop)
/// before `run_until_idle`.
pub struct Scope<'a> {
    core: &'a mut Core,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(core: &'a mut Core) -> Self {
        Self { core }
    }

    /// Current reading of the loop's clock
    pub fn now(&self) -> Instant {
        self.core.clock.now()
    }

    /// State of the loop; `Draining` whenever a callback is running
    pub fn state(&self) -> LoopState {
        self.core.inbox.state()
    }

    /// Handle of the timer, immediate or completion whose callback is running
    pub fn current_handle(&self) -> Option<TaskHandle> {
        self.core.current.as_ref().map(|c| c.handle)
    }

    /// Schedule `callback` to run once `delay` has elapsed, or every `delay`
    /// when `repeating`.
    ///
    /// A zero delay still waits for the next timer phase. Repeating timers
    /// are re-armed from the time they actually fired, with intervals below
    /// one millisecond raised to one millisecond.
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
        if repeating {
            self.core
                .add_timer(delay, Some(delay), TimerCallback::Repeating(boxed_repeating(callback)))
        } else {
            self.core
                .add_timer(delay, None, TimerCallback::Once(boxed(callback)))
        }
    }

    /// Run `callback` once after `delay`
    pub fn set_timeout<F, R>(&mut self, delay: Duration, callback: F) -> SchedulerResult<TaskHandle>
    where
        F: FnOnce(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.core
            .add_timer(delay, None, TimerCallback::Once(boxed(callback)))
    }

    /// Run `callback` every `interval` until cancelled
    pub fn set_interval<F, R>(&mut self, interval: Duration, callback: F) -> SchedulerResult<TaskHandle>
    where
        F: FnMut(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.schedule_timer(interval, true, callback)
    }

    /// Run `callback` in the immediates phase of this iteration, or of the
    /// next one when called from an immediate.
    pub fn schedule_immediate<F, R>(&mut self, callback: F) -> SchedulerResult<TaskHandle>
    where
        F: FnOnce(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.core.ensure_accepting()?;
        let handle = self.core.registry.register(TaskKind::Immediate);
        self.core.immediates.push(handle, boxed(callback));
        Ok(handle)
    }

    /// Run `callback` as soon as the current unit of work finishes, before
    /// any other timer, immediate or completion.
    pub fn enqueue_microtask<F, R>(&mut self, callback: F) -> SchedulerResult<()>
    where
        F: FnOnce(&mut Scope<'_>) -> R + 'static,
        R: CallbackReturn,
    {
        self.core.ensure_accepting()?;
        self.core.microtasks.enqueue(boxed(callback));
        Ok(())
    }

    /// Cancel a pending task. Returns `true` only when this call cancelled
    /// it; cancelling twice, after the task ran, or with a handle from
    /// another loop returns `false`.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.core.cancel(handle).is_ok()
    }

    /// Like [`cancel`](Self::cancel), but says why nothing was cancelled.
    pub fn try_cancel(&mut self, handle: TaskHandle) -> SchedulerResult<()> {
        self.core.cancel(handle)
    }

    /// Whether `handle` is scheduled or running and has not been cancelled
    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.core.registry.is_live(handle)
    }

    /// Run `compute(input)` on the worker pool.
    ///
    /// The returned future resolves once the loop delivers the result in its
    /// completions phase.
    pub fn submit_worker_job<I, O, F>(&mut self, compute: F, input: I) -> SchedulerResult<JobFuture<O>>
    where
        F: FnOnce(I) -> O + Send + 'static,
        I: Send + 'static,
        O: Send + 'static,
    {
        self.core.ensure_accepting()?;
        let handle = self.core.registry.register(TaskKind::WorkerJob);
        let (future, resolver) = job_channel::<O>(handle);
        let on_complete: CompletionCallback = Box::new(move |_, outcome| {
            resolver.resolve(outcome.and_then(Payload::take::<O>));
            Ok(())
        });
        self.core
            .queue_job(handle, move || Payload::new(compute(input)), on_complete)?;
        Ok(future)
    }

    /// Run `compute(input)` on the worker pool and hand the result to
    /// `on_complete` on the loop thread.
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
        self.core.ensure_accepting()?;
        let handle = self.core.registry.register(TaskKind::WorkerJob);
        let on_complete: CompletionCallback = Box::new(move |scope, outcome| {
            on_complete(scope, outcome.and_then(Payload::take::<O>)).into_result()
        });
        self.core
            .queue_job(handle, move || Payload::new(compute(input)), on_complete)?;
        Ok(handle)
    }

    /// Run `compute(&buffer, input)` on the worker pool with access to a
    /// shared buffer; `on_complete` receives the result on the loop thread.
    ///
    /// The buffer handle is moved into the job before it is queued.
    /// Coordinating access to the cells is up to the caller.
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
        self.submit_worker_job_with(move |input| compute(&buffer, input), input, on_complete)
    }

    /// Declare an I/O operation completed by an external collaborator.
    ///
    /// The loop stays alive until a completion for the returned handle
    /// arrives through a [`CompletionSender`], then runs `on_complete`.
    pub fn register_io<C, R>(&mut self, on_complete: C) -> SchedulerResult<TaskHandle>
    where
        C: FnOnce(&mut Scope<'_>, Outcome) -> R + 'static,
        R: CallbackReturn,
    {
        self.core.ensure_accepting()?;
        let handle = self.core.registry.register(TaskKind::Io);
        self.core.pending.insert(
            handle,
            PendingCompletion {
                kind: TaskKind::Io,
                callback: boxed_completion(on_complete),
                ticket: None,
            },
        );
        Ok(handle)
    }

    /// Sender an I/O collaborator uses to post completions to this loop
    pub fn register_io_completion_source(&self) -> CompletionSender {
        CompletionSender::new(Arc::new(self.core.inbox.clone()))
    }

    /// Thread-safe handle to this loop
    pub fn loop_handle(&self) -> LoopHandle {
        LoopHandle::new(self.core.inbox.clone())
    }

    /// Make the current `run_until_idle`/`run_forever` call return once this
    /// callback finishes. Queued work stays queued.
    pub fn stop(&mut self) {
        self.core.stop_requested = true;
    }
}
