//! Completion inbox
//!
//! The one channel other threads use to reach the loop: worker results, I/O
//! completions, remote calls and wake/stop signals all arrive here and are
//! only acted on by the loop thread.

use crate::error::CallbackReturn;
use crate::scheduler::task::{boxed_remote, RemoteCall};
use crate::scheduler::{LoopState, Scope};
use crossbeam::channel::{self, Receiver, Sender};
use ember_sdk::{CompletionEvent, CompletionSender, CompletionSink, PostError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

pub(crate) enum Envelope {
    Completion(CompletionEvent),
    Call(RemoteCall),
    Wake,
    /// Stop request tagged with the run it was sent during
    Stop(u64),
}

/// Loop status readable from any thread
struct Shared {
    open: AtomicBool,
    state: AtomicU8,
    /// Bumped at the start of every run; zero before the first
    run: AtomicU64,
}

/// Sending half of the inbox plus the status shared with every handle.
#[derive(Clone)]
pub(crate) struct InboxSender {
    tx: Sender<Envelope>,
    shared: Arc<Shared>,
}

impl InboxSender {
    fn send(&self, envelope: Envelope) -> Result<(), PostError> {
        if !self.is_open() {
            return Err(PostError::Closed);
        }
        self.tx.send(envelope).map_err(|_| PostError::Closed)
    }

    /// Raw channel sender for the worker pool, which bypasses the open flag
    pub(crate) fn raw(&self) -> Sender<Envelope> {
        self.tx.clone()
    }

    pub(crate) fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> LoopState {
        LoopState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    /// Start a new run and return its number. Stops sent before this call
    /// carry an older number and are ignored by the new run.
    pub(crate) fn begin_run(&self) -> u64 {
        self.shared.run.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn current_run(&self) -> u64 {
        self.shared.run.load(Ordering::Acquire)
    }
}

impl CompletionSink for InboxSender {
    fn post(&self, event: CompletionEvent) -> Result<(), PostError> {
        self.send(Envelope::Completion(event))
    }
}

pub(crate) fn inbox() -> (InboxSender, Receiver<Envelope>) {
    let (tx, rx) = channel::unbounded();
    let sender = InboxSender {
        tx,
        shared: Arc::new(Shared {
            open: AtomicBool::new(true),
            state: AtomicU8::new(LoopState::Idle as u8),
            run: AtomicU64::new(0),
        }),
    };
    (sender, rx)
}

/// Thread-safe handle to a running loop.
///
/// Everything sent through it is executed on the loop thread during the
/// completions phase, in the order it was sent. Once the loop shuts down
/// every method returns [`PostError::Closed`] or does nothing.
#[derive(Clone)]
pub struct LoopHandle {
    inbox: InboxSender,
}

impl LoopHandle {
    pub(crate) fn new(inbox: InboxSender) -> Self {
        Self { inbox }
    }

    /// Run `callback` on the loop thread.
    pub fn call_soon<F, R>(&self, callback: F) -> Result<(), PostError>
    where
        F: FnOnce(&mut Scope<'_>) -> R + Send + 'static,
        R: CallbackReturn,
    {
        self.inbox.send(Envelope::Call(boxed_remote(callback)))
    }

    /// Wake a loop blocked in its poll phase without giving it work.
    pub fn wake(&self) {
        let _ = self.inbox.send(Envelope::Wake);
    }

    /// Ask the loop to return from `run_until_idle`/`run_forever` after the
    /// unit of work it is currently running.
    ///
    /// Only the current run is affected. A stop sent while the loop is not
    /// running is discarded by the next run.
    pub fn stop(&self) {
        let _ = self.inbox.send(Envelope::Stop(self.inbox.current_run()));
    }

    /// Sender for completions of I/O registered with
    /// [`Scope::register_io`](crate::Scope::register_io)
    pub fn completion_sender(&self) -> CompletionSender {
        CompletionSender::new(Arc::new(self.inbox.clone()))
    }

    /// Whether the loop still accepts messages
    pub fn is_open(&self) -> bool {
        self.inbox.is_open()
    }

    /// State of the loop as seen from this thread, including
    /// [`LoopState::Polling`] while it is blocked waiting for the inbox
    pub fn state(&self) -> LoopState {
        self.inbox.state()
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("open", &self.is_open())
            .field("state", &self.state())
            .finish()
    }
}
