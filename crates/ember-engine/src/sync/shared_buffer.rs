//! Fixed-size array of atomic `i32` cells with futex-style wait/notify.
//!
//! Cells are plain atomics; `wait` and `notify` go through one mutex and
//! condition variable per buffer. A waiter re-checks its cell under the
//! mutex before sleeping and every notifier takes the mutex before
//! signalling, so a store followed by `notify` cannot slip between the
//! check and the sleep.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of [`SharedBuffer::wait`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitResult {
    /// Woken by `notify`
    Ok,
    /// The cell did not hold the expected value, nothing was waited for
    NotEqual,
    /// The timeout elapsed first
    TimedOut,
}

struct Inner {
    cells: Box<[AtomicI32]>,
    lock: Mutex<u64>,
    cond: Condvar,
}

/// Cloneable handle to a shared array of atomic cells.
///
/// Clones share the same cells. Indexing out of range panics, as slice
/// indexing does.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<Inner>,
}

impl SharedBuffer {
    /// Create a buffer of `len` zeroed cells
    pub fn new(len: usize) -> Self {
        let cells = (0..len).map(|_| AtomicI32::new(0)).collect();
        Self {
            inner: Arc::new(Inner {
                cells,
                lock: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.inner.cells.len()
    }

    /// Whether the buffer has no cells
    pub fn is_empty(&self) -> bool {
        self.inner.cells.is_empty()
    }

    /// Read a cell
    pub fn load(&self, index: usize) -> i32 {
        self.inner.cells[index].load(Ordering::SeqCst)
    }

    /// Write a cell
    pub fn store(&self, index: usize, value: i32) {
        self.inner.cells[index].store(value, Ordering::SeqCst);
    }

    /// Add to a cell, returning the previous value
    pub fn add(&self, index: usize, delta: i32) -> i32 {
        self.inner.cells[index].fetch_add(delta, Ordering::SeqCst)
    }

    /// Replace `current` with `new`, returning the value actually found.
    pub fn compare_exchange(&self, index: usize, current: i32, new: i32) -> Result<i32, i32> {
        self.inner.cells[index].compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }

    /// Block while `cell[index] == expected`, until notified or `timeout`
    /// elapses. `None`, or a timeout too large to represent as a deadline,
    /// waits indefinitely.
    ///
    /// Never call this on the loop thread: it blocks the whole loop.
    pub fn wait(&self, index: usize, expected: i32, timeout: Option<Duration>) -> WaitResult {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut generation = self.inner.lock.lock();
        if self.load(index) != expected {
            return WaitResult::NotEqual;
        }

        let start = *generation;
        while *generation == start {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .cond
                        .wait_until(&mut generation, deadline)
                        .timed_out()
                    {
                        return if *generation == start {
                            WaitResult::TimedOut
                        } else {
                            WaitResult::Ok
                        };
                    }
                }
                None => self.inner.cond.wait(&mut generation),
            }
        }
        WaitResult::Ok
    }

    /// Wake every thread blocked in [`wait`](Self::wait) on this buffer.
    ///
    /// Waiters on other cells wake too; `wait` callers re-check their cell
    /// if they need a specific value.
    pub fn notify(&self, index: usize) {
        // Bounds check matches the other accessors
        let _ = &self.inner.cells[index];
        let mut generation = self.inner.lock.lock();
        *generation = generation.wrapping_add(1);
        self.inner.cond.notify_all();
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_atomic_ops() {
        let buffer = SharedBuffer::new(4);
        assert_eq!(buffer.len(), 4);
        buffer.store(1, 10);
        assert_eq!(buffer.add(1, 5), 10);
        assert_eq!(buffer.load(1), 15);
        assert_eq!(buffer.compare_exchange(1, 15, 0), Ok(15));
        assert_eq!(buffer.compare_exchange(1, 15, 1), Err(0));
        assert!(SharedBuffer::new(0).is_empty());
    }

    #[test]
    fn test_wait_not_equal() {
        let buffer = SharedBuffer::new(1);
        buffer.store(0, 3);
        assert_eq!(buffer.wait(0, 0, None), WaitResult::NotEqual);
    }

    #[test]
    fn test_wait_times_out() {
        let buffer = SharedBuffer::new(1);
        assert_eq!(
            buffer.wait(0, 0, Some(Duration::from_millis(10))),
            WaitResult::TimedOut
        );
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let buffer = SharedBuffer::new(1);
        let remote = buffer.clone();
        let waiter = thread::spawn(move || remote.wait(0, 0, Some(Duration::from_secs(5))));

        // Keep notifying until the waiter is parked and sees it
        while !waiter.is_finished() {
            buffer.store(0, 1);
            buffer.notify(0);
            thread::sleep(Duration::from_millis(5));
        }
        let result = waiter.join().unwrap();
        assert!(matches!(result, WaitResult::Ok | WaitResult::NotEqual));
    }

    #[test]
    fn test_unrepresentable_timeout_waits_for_notify() {
        let buffer = SharedBuffer::new(1);
        let remote = buffer.clone();
        let waiter = thread::spawn(move || remote.wait(0, 0, Some(Duration::MAX)));

        while !waiter.is_finished() {
            buffer.store(0, 1);
            buffer.notify(0);
            thread::sleep(Duration::from_millis(5));
        }
        let result = waiter.join().unwrap();
        assert!(matches!(result, WaitResult::Ok | WaitResult::NotEqual));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_panics() {
        SharedBuffer::new(2).load(2);
    }
}
