//! Monotonic time sources for the loop.
//!
//! Timer deadlines are always computed from a [`Clock`], never from wall-clock
//! time. [`ManualClock`] lets tests move time explicitly; when the loop would
//! otherwise sleep until the next timer it advances a virtual clock instead.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Whether time only moves when told to.
    ///
    /// A virtual clock is advanced by the loop instead of the loop sleeping.
    fn is_virtual(&self) -> bool {
        false
    }

    /// Move a virtual clock forward to `deadline`. Real clocks ignore this.
    fn advance_to(&self, _deadline: Instant) {}
}

/// The operating system's monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when advanced.
///
/// Clones share the same underlying time, so a test can keep one copy and
/// hand another to the loop.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a clock frozen at `start`
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn is_virtual(&self) -> bool {
        true
    }

    fn advance_to(&self, deadline: Instant) {
        let mut now = self.now.lock();
        // Never moves backwards
        if deadline > *now {
            *now = deadline;
        }
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock").field("now", &*self.now.lock()).finish()
    }
}
