//! Microtask queue.
//!
//! The driver drains this queue to exhaustion after every unit of work. The
//! drain pops one entry at a time, so microtasks queued by a running
//! microtask are picked up by the same drain rather than a later one.

use crate::scheduler::task::Callback;
use std::collections::VecDeque;

#[derive(Default)]
pub(crate) struct MicrotaskQueue {
    queue: VecDeque<Callback>,
}

impl MicrotaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&mut self, callback: Callback) {
        self.queue.push_back(callback);
    }

    pub(crate) fn pop(&mut self) -> Option<Callback> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything without running it. Returns how many were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }
}
