//! Units of deferred work and their single dispatch point

use crate::error::{panic_message, CallbackError, CallbackReturn};
use crate::scheduler::Scope;
use ember_sdk::{Outcome, TaskHandle};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Kind of scheduled work
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// One-shot or repeating timer
    Timer,
    /// Callback for the immediates phase
    Immediate,
    /// Continuation drained between macrotasks
    Microtask,
    /// Job running on the worker pool
    WorkerJob,
    /// Operation owned by an external I/O collaborator
    Io,
    /// Callback posted from another thread through a `LoopHandle`
    Remote,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Timer => "timer",
            TaskKind::Immediate => "immediate",
            TaskKind::Microtask => "microtask",
            TaskKind::WorkerJob => "worker job",
            TaskKind::Io => "io",
            TaskKind::Remote => "remote",
        };
        f.write_str(name)
    }
}

pub(crate) type Callback = Box<dyn FnOnce(&mut Scope<'_>) -> Result<(), String>>;
pub(crate) type RepeatingCallback = Box<dyn FnMut(&mut Scope<'_>) -> Result<(), String>>;
pub(crate) type CompletionCallback = Box<dyn FnOnce(&mut Scope<'_>, Outcome) -> Result<(), String>>;
pub(crate) type RemoteCall = Box<dyn FnOnce(&mut Scope<'_>) -> Result<(), String> + Send>;

pub(crate) fn boxed<F, R>(callback: F) -> Callback
where
    F: FnOnce(&mut Scope<'_>) -> R + 'static,
    R: CallbackReturn,
{
    Box::new(move |scope| callback(scope).into_result())
}

pub(crate) fn boxed_repeating<F, R>(mut callback: F) -> RepeatingCallback
where
    F: FnMut(&mut Scope<'_>) -> R + 'static,
    R: CallbackReturn,
{
    Box::new(move |scope| callback(scope).into_result())
}

pub(crate) fn boxed_completion<F, R>(callback: F) -> CompletionCallback
where
    F: FnOnce(&mut Scope<'_>, Outcome) -> R + 'static,
    R: CallbackReturn,
{
    Box::new(move |scope, outcome| callback(scope, outcome).into_result())
}

pub(crate) fn boxed_remote<F, R>(callback: F) -> RemoteCall
where
    F: FnOnce(&mut Scope<'_>) -> R + Send + 'static,
    R: CallbackReturn,
{
    Box::new(move |scope| callback(scope).into_result())
}

/// Timer body
pub(crate) enum TimerCallback {
    Once(Callback),
    Repeating(RepeatingCallback),
}

/// Work taken out of its queue and about to run on the loop thread.
pub(crate) enum Work {
    Timer {
        handle: TaskHandle,
        callback: TimerCallback,
    },
    Immediate {
        handle: TaskHandle,
        callback: Callback,
    },
    Microtask(Callback),
    Completion {
        handle: TaskHandle,
        kind: TaskKind,
        callback: CompletionCallback,
        outcome: Outcome,
    },
    Remote(RemoteCall),
}

/// How a callback ended when it did not succeed
enum Failure {
    Error(String),
    Panic(String),
}

/// What the driver learns from running one unit of work
pub(crate) struct Ran {
    pub error: Option<CallbackError>,
    /// Repeating timer body to re-arm
    pub rearm: Option<RepeatingCallback>,
}

impl Work {
    pub(crate) fn kind(&self) -> TaskKind {
        match self {
            Work::Timer { .. } => TaskKind::Timer,
            Work::Immediate { .. } => TaskKind::Immediate,
            Work::Microtask(_) => TaskKind::Microtask,
            Work::Completion { kind, .. } => *kind,
            Work::Remote(_) => TaskKind::Remote,
        }
    }

    pub(crate) fn handle(&self) -> Option<TaskHandle> {
        match self {
            Work::Timer { handle, .. }
            | Work::Immediate { handle, .. }
            | Work::Completion { handle, .. } => Some(*handle),
            Work::Microtask(_) | Work::Remote(_) => None,
        }
    }

    /// Run the work, catching both returned errors and panics.
    pub(crate) fn run(self, scope: &mut Scope<'_>) -> Ran {
        let kind = self.kind();
        let handle = self.handle();

        let (result, rearm) = match self {
            Work::Timer {
                callback: TimerCallback::Once(callback),
                ..
            }
            | Work::Immediate { callback, .. }
            | Work::Microtask(callback) => (guard(|| callback(scope)), None),
            Work::Timer {
                callback: TimerCallback::Repeating(mut callback),
                ..
            } => {
                let result = guard(|| callback(scope));
                (result, Some(callback))
            }
            Work::Completion {
                callback, outcome, ..
            } => (guard(|| callback(scope, outcome)), None),
            Work::Remote(call) => (guard(|| call(scope)), None),
        };

        let error = result.err().map(|failure| match failure {
            Failure::Error(message) => CallbackError::Failed {
                kind,
                handle,
                message,
            },
            Failure::Panic(message) => CallbackError::Panicked {
                kind,
                handle,
                message,
            },
        });

        Ran { error, rearm }
    }
}

fn guard(f: impl FnOnce() -> Result<(), String>) -> Result<(), Failure> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(Failure::Error(message)),
        Err(payload) => Err(Failure::Panic(panic_message(payload.as_ref()))),
    }
}
