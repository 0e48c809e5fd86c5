//! Worker jobs and I/O operations waiting for their completion event

use crate::pool::JobTicket;
use crate::scheduler::task::CompletionCallback;
use crate::scheduler::TaskKind;
use ember_sdk::TaskHandle;
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub(crate) struct PendingCompletion {
    pub kind: TaskKind,
    pub callback: CompletionCallback,
    /// Present for worker jobs; I/O operations have no pool-side state
    pub ticket: Option<Arc<JobTicket>>,
}

#[derive(Default)]
pub(crate) struct CompletionTable {
    entries: FxHashMap<TaskHandle, PendingCompletion>,
}

impl CompletionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, handle: TaskHandle, pending: PendingCompletion) {
        self.entries.insert(handle, pending);
    }

    pub(crate) fn get(&self, handle: TaskHandle) -> Option<&PendingCompletion> {
        self.entries.get(&handle)
    }

    pub(crate) fn remove(&mut self, handle: TaskHandle) -> Option<PendingCompletion> {
        self.entries.remove(&handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, handing each to the caller.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (TaskHandle, PendingCompletion)> + '_ {
        self.entries.drain()
    }
}
