//! Completion events and the sender handed to collaborators

use crate::{CompletionError, PostError, TaskHandle};
use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Payload
// ============================================================================

/// Type-erased result value carried by a completion.
///
/// Payloads are produced on worker or I/O threads and consumed on the loop
/// thread, so the contained value must be `Send`.
pub struct Payload(Box<dyn Any + Send>);

impl Payload {
    /// Wrap a value
    pub fn new<T: Any + Send>(value: T) -> Self {
        Payload(Box::new(value))
    }

    /// Check whether the payload holds a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Borrow the value as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Take the value out as `T`, giving the payload back on mismatch
    pub fn downcast<T: Any>(self) -> Result<T, Payload> {
        match self.0.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(inner) => Err(Payload(inner)),
        }
    }

    /// Take the value out as `T`, reporting a mismatch as a `CompletionError`
    pub fn take<T: Any>(self) -> Result<T, CompletionError> {
        self.downcast::<T>().map_err(|_| CompletionError::PayloadType {
            expected: any::type_name::<T>(),
        })
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload(..)")
    }
}

/// Result of an asynchronous operation as seen by the loop
pub type Outcome = Result<Payload, CompletionError>;

// ============================================================================
// CompletionEvent
// ============================================================================

/// Result of one operation, addressed to the handle that is waiting for it.
///
/// The loop consumes each event at most once; events for handles that are no
/// longer pending are dropped.
#[derive(Debug)]
pub struct CompletionEvent {
    /// Handle of the pending operation
    pub handle: TaskHandle,
    /// Value or failure
    pub outcome: Outcome,
}

impl CompletionEvent {
    /// Successful completion carrying `value`
    pub fn ok<T: Any + Send>(handle: TaskHandle, value: T) -> Self {
        Self {
            handle,
            outcome: Ok(Payload::new(value)),
        }
    }

    /// Failed completion
    pub fn err(handle: TaskHandle, error: CompletionError) -> Self {
        Self {
            handle,
            outcome: Err(error),
        }
    }
}

// ============================================================================
// CompletionSink / CompletionSender
// ============================================================================

/// Destination for completion events.
///
/// Event loops implement this for their inbox. Collaborators only ever see it
/// through a [`CompletionSender`].
pub trait CompletionSink: Send + Sync {
    /// Deliver an event. Must not block.
    fn post(&self, event: CompletionEvent) -> Result<(), PostError>;
}

/// Cloneable, thread-safe sender for completion events.
#[derive(Clone)]
pub struct CompletionSender {
    sink: Arc<dyn CompletionSink>,
}

impl CompletionSender {
    /// Create a sender over any sink
    pub fn new(sink: Arc<dyn CompletionSink>) -> Self {
        Self { sink }
    }

    /// Post a prepared event
    pub fn post(&self, event: CompletionEvent) -> Result<(), PostError> {
        self.sink.post(event)
    }

    /// Report success for `handle`.
    ///
    /// Delivery failures are ignored: a closed loop has nobody left to tell.
    pub fn complete<T: Any + Send>(&self, handle: TaskHandle, value: T) {
        let _ = self.post(CompletionEvent::ok(handle, value));
    }

    /// Report failure for `handle`. Delivery failures are ignored.
    pub fn fail(&self, handle: TaskHandle, reason: impl Into<String>) {
        let _ = self.post(CompletionEvent::err(
            handle,
            CompletionError::Failed(reason.into()),
        ));
    }
}

impl fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSender").finish_non_exhaustive()
    }
}
