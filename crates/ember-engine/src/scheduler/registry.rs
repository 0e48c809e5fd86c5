//! Cancellation registry
//!
//! Maps every live handle to the kind of structure holding its task, so a
//! cancel goes straight to the right map instead of scanning queues.

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::TaskKind;
use ember_sdk::TaskHandle;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_LOOP_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) struct CancellationRegistry {
    loop_id: u32,
    /// Next id to issue; ids below this were issued at some point
    next_id: u64,
    live: FxHashMap<TaskHandle, TaskKind>,
}

impl CancellationRegistry {
    pub(crate) fn new() -> Self {
        Self {
            loop_id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
            next_id: 1,
            live: FxHashMap::default(),
        }
    }

    pub(crate) fn loop_id(&self) -> u32 {
        self.loop_id
    }

    /// Issue a fresh handle for a task of `kind`
    pub(crate) fn register(&mut self, kind: TaskKind) -> TaskHandle {
        let handle = TaskHandle::from_raw(self.loop_id, self.next_id);
        self.next_id += 1;
        self.live.insert(handle, kind);
        handle
    }

    /// Kind of a live handle, or `InvalidHandle` for anything else
    pub(crate) fn lookup(&self, handle: TaskHandle) -> SchedulerResult<TaskKind> {
        self.live
            .get(&handle)
            .copied()
            .ok_or(SchedulerError::InvalidHandle(handle))
    }

    pub(crate) fn is_live(&self, handle: TaskHandle) -> bool {
        self.live.contains_key(&handle)
    }

    /// Forget a handle once its task completed or was cancelled.
    pub(crate) fn release(&mut self, handle: TaskHandle) -> Option<TaskKind> {
        self.live.remove(&handle)
    }

    /// Whether `handle` was ever issued by this registry
    pub(crate) fn was_issued(&self, handle: TaskHandle) -> bool {
        handle.loop_id() == self.loop_id && handle.as_u64() < self.next_id
    }

    /// Live handles of one kind
    pub(crate) fn count(&self, kind: TaskKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn clear(&mut self) {
        self.live.clear();
    }
}
