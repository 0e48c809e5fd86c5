//! Immediate queue
//!
//! FIFO order is kept in a deque of handles while the callbacks sit in a map,
//! so cancellation is a map removal. The immediates phase only visits the
//! entries present when it started (`begin_batch`); anything queued while it
//! runs waits for the next iteration.

use crate::scheduler::task::Callback;
use ember_sdk::TaskHandle;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

#[derive(Default)]
pub(crate) struct ImmediateQueue {
    order: VecDeque<TaskHandle>,
    entries: FxHashMap<TaskHandle, Callback>,
}

impl ImmediateQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, handle: TaskHandle, callback: Callback) {
        self.order.push_back(handle);
        self.entries.insert(handle, callback);
        if self.order.len() >= 64 && self.order.len() > 2 * self.entries.len() {
            let entries = &self.entries;
            self.order.retain(|h| entries.contains_key(h));
        }
    }

    pub(crate) fn remove(&mut self, handle: TaskHandle) -> Option<Callback> {
        self.entries.remove(&handle)
    }

    /// Last handle queued so far. Handles increase monotonically, so the
    /// phase runs everything up to and including this one.
    pub(crate) fn begin_batch(&self) -> Option<TaskHandle> {
        self.order.back().copied()
    }

    /// Pop the next live entry queued no later than `boundary`.
    pub(crate) fn pop_until(&mut self, boundary: TaskHandle) -> Option<(TaskHandle, Callback)> {
        while let Some(&front) = self.order.front() {
            if front > boundary {
                return None;
            }
            self.order.pop_front();
            if let Some(callback) = self.entries.remove(&front) {
                return Some((front, callback));
            }
        }
        None
    }

    /// Number of live immediates
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.order.clear();
        dropped
    }
}
