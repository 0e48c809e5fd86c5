//! Timer store
//!
//! Timers live in a map keyed by handle; a min-heap of `(deadline, seq)`
//! keys orders them. Cancelling only removes the map entry, so heap keys for
//! cancelled or re-armed timers are discarded lazily when they surface.
//! `seq` grows with every insertion, which makes equal deadlines fire in
//! insertion order.

use crate::scheduler::task::TimerCallback;
use ember_sdk::TaskHandle;
use rustc_hash::FxHashMap;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Smallest interval a repeating timer may use
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// `delay` after `from`, or the latest representable instant short of that
/// when the sum overflows. A timer that far out never fires in practice but
/// stays cancellable.
pub(crate) fn deadline_after(from: Instant, delay: Duration) -> Instant {
    let mut delay = delay;
    loop {
        if let Some(deadline) = from.checked_add(delay) {
            return deadline;
        }
        delay /= 2;
    }
}

/// Heap key for a timer
struct TimerKey {
    deadline: Instant,
    seq: u64,
    handle: TaskHandle,
}

impl Ord for TimerKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for TimerKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerKey {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerKey {}

/// A pending timer
pub(crate) struct TimerEntry {
    pub deadline: Instant,
    pub interval: Option<Duration>,
    pub scheduled_at: Instant,
    pub callback: TimerCallback,
    seq: u64,
}

#[derive(Default)]
pub(crate) struct TimerStore {
    heap: BinaryHeap<Reverse<TimerKey>>,
    entries: FxHashMap<TaskHandle, TimerEntry>,
    next_seq: u64,
}

impl TimerStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a timer due at `deadline`.
    pub(crate) fn insert(
        &mut self,
        handle: TaskHandle,
        deadline: Instant,
        interval: Option<Duration>,
        scheduled_at: Instant,
        callback: TimerCallback,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(Reverse(TimerKey {
            deadline,
            seq,
            handle,
        }));
        self.entries.insert(
            handle,
            TimerEntry {
                deadline,
                interval,
                scheduled_at,
                callback,
                seq,
            },
        );
        self.maybe_compact();
    }

    /// Remove a pending timer.
    pub(crate) fn remove(&mut self, handle: TaskHandle) -> Option<TimerEntry> {
        self.entries.remove(&handle)
    }

    /// Sequence number the next insertion will get. A timer phase only
    /// fires keys below the value read when it started, so timers scheduled
    /// or re-armed during the phase wait for the next one.
    pub(crate) fn phase_boundary(&self) -> u64 {
        self.next_seq
    }

    /// Pop the earliest live timer with `deadline <= now` inserted before
    /// `boundary`.
    ///
    /// Keys inserted at or after `boundary` carry a deadline no earlier than
    /// any older due key, so meeting one ends the phase.
    pub(crate) fn pop_due(
        &mut self,
        now: Instant,
        boundary: u64,
    ) -> Option<(TaskHandle, TimerEntry)> {
        while let Some(Reverse(key)) = self.heap.peek() {
            if key.deadline > now || key.seq >= boundary {
                return None;
            }
            let Reverse(key) = self.heap.pop()?;
            if self.is_live(&key) {
                let entry = self.entries.remove(&key.handle)?;
                return Some((key.handle, entry));
            }
        }
        None
    }

    /// Deadline of the earliest live timer, discarding stale keys on the way.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        loop {
            let Reverse(key) = self.heap.peek()?;
            if self.is_live(key) {
                return Some(key.deadline);
            }
            self.heap.pop();
        }
    }

    /// Number of live timers
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every timer without running it. Returns how many were live.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.heap.clear();
        dropped
    }

    fn is_live(&self, key: &TimerKey) -> bool {
        self.entries
            .get(&key.handle)
            .is_some_and(|entry| entry.seq == key.seq)
    }

    /// Rebuild the heap once stale keys outnumber live ones.
    fn maybe_compact(&mut self) {
        if self.heap.len() < 64 || self.heap.len() <= 2 * self.entries.len() {
            return;
        }
        let entries = &self.entries;
        self.heap
            .retain(|Reverse(key)| entries.get(&key.handle).is_some_and(|e| e.seq == key.seq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn once() -> TimerCallback {
        TimerCallback::Once(Box::new(|_| Ok(())))
    }

    fn handle(id: u64) -> TaskHandle {
        TaskHandle::from_raw(0, id)
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_millis(5)),
            now + Duration::from_millis(5)
        );

        let far = deadline_after(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(365 * 24 * 3600));
    }

    #[test]
    fn test_pop_in_deadline_order() {
        let mut store = TimerStore::new();
        let now = Instant::now();

        store.insert(handle(1), now + Duration::from_millis(30), None, now, once());
        store.insert(handle(2), now + Duration::from_millis(10), None, now, once());
        store.insert(handle(3), now + Duration::from_millis(20), None, now, once());

        let later = now + Duration::from_millis(50);
        let order: Vec<u64> = std::iter::from_fn(|| store.pop_due(later, u64::MAX))
            .map(|(h, _)| h.as_u64())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let mut store = TimerStore::new();
        let now = Instant::now();
        let deadline = now + Duration::from_millis(50);

        for id in [5, 1, 9, 3] {
            store.insert(handle(id), deadline, None, now, once());
        }

        let order: Vec<u64> = std::iter::from_fn(|| store.pop_due(deadline, u64::MAX))
            .map(|(h, _)| h.as_u64())
            .collect();
        assert_eq!(order, vec![5, 1, 9, 3]);
    }

    #[test]
    fn test_not_due_yet() {
        let mut store = TimerStore::new();
        let now = Instant::now();
        store.insert(handle(1), now + Duration::from_millis(10), None, now, once());

        assert!(store.pop_due(now, u64::MAX).is_none());
        assert_eq!(store.next_deadline(), Some(now + Duration::from_millis(10)));
    }

    #[test]
    fn test_removed_timer_is_skipped() {
        let mut store = TimerStore::new();
        let now = Instant::now();
        store.insert(handle(1), now, None, now, once());
        store.insert(handle(2), now + Duration::from_millis(5), None, now, once());

        assert!(store.remove(handle(1)).is_some());
        assert!(store.remove(handle(1)).is_none());
        assert_eq!(store.next_deadline(), Some(now + Duration::from_millis(5)));

        let (h, _) = store.pop_due(now + Duration::from_millis(5), u64::MAX).unwrap();
        assert_eq!(h, handle(2));
    }

    #[test]
    fn test_rearmed_timer_uses_new_key() {
        let mut store = TimerStore::new();
        let now = Instant::now();
        store.insert(handle(1), now, Some(Duration::from_millis(100)), now, once());

        let boundary = store.phase_boundary();
        let (h, entry) = store.pop_due(now, boundary).unwrap();
        store.insert(h, now, entry.interval, now, entry.callback);

        // Due again, but inserted during this phase
        assert!(store.pop_due(now, boundary).is_none());
        assert!(store.pop_due(now, store.phase_boundary()).is_some());
        store.insert(h, now + Duration::from_millis(100), None, now, once());
        assert!(store.entries.contains_key(&h));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_compaction_drops_stale_keys() {
        let mut store = TimerStore::new();
        let now = Instant::now();
        for id in 0..100 {
            store.insert(handle(id), now + Duration::from_secs(1), None, now, once());
        }
        for id in 0..90 {
            store.remove(handle(id));
        }
        // Next insert triggers the rebuild
        store.insert(handle(100), now + Duration::from_secs(1), None, now, once());
        assert_eq!(store.heap.len(), 11);
        assert_eq!(store.clear(), 11);
    }
}
