//! Per-achievement progress state and the pending update queue.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

/// Mutable progress record of one achievement.
///
/// `next_progress` only grows, `unlocked` and `invalid` only go from false to
/// true. All three are atomics so native reports can raise them without the
/// resource lock.
#[derive(Debug, Default)]
pub(crate) struct ProgressState {
    next_progress: AtomicU32,
    unlocked: AtomicBool,
    invalid: AtomicBool,
}

impl ProgressState {
    pub(crate) fn next_progress(&self) -> u32 {
        self.next_progress.load(Ordering::Acquire)
    }

    pub(crate) fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::Acquire)
    }

    pub(crate) fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// No update may ever be applied once this is true.
    pub(crate) fn is_closed(&self) -> bool {
        self.is_unlocked() || self.is_invalid()
    }

    /// Raise the floor to `value` unless it is already at least that high.
    ///
    /// Returns whether the floor moved. Lock-free compare-and-swap loop, so a
    /// lower concurrent report can never overwrite a higher one.
    pub(crate) fn raise_floor(&self, value: u32) -> bool {
        self.next_progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (value > current).then_some(value)
            })
            .is_ok()
    }

    pub(crate) fn unlock(&self) {
        self.unlocked.store(true, Ordering::Release);
    }

    pub(crate) fn invalidate(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    /// Back to the initial state. Only used while the update loop is stopped.
    pub(crate) fn reset(&self) {
        self.next_progress.store(0, Ordering::Release);
        self.unlocked.store(false, Ordering::Release);
        self.invalid.store(false, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PendingUpdate {
    progress: u32,
    enqueued_at: u64,
    seq: u64,
}

/// Coalesced progress requests waiting to be sent to the platform.
///
/// Holds at most one entry per achievement. Merging keeps the highest value
/// and the original insertion stamp, so an achievement that keeps receiving
/// updates does not lose its place in the queue.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: HashMap<String, PendingUpdate>,
    next_seq: u64,
}

impl PendingQueue {
    /// Merge a request. Returns true if the queue changed.
    pub(crate) fn merge(&mut self, id: &str, progress: u32, now_millis: u64) -> bool {
        if let Some(existing) = self.entries.get_mut(id) {
            if progress > existing.progress {
                existing.progress = progress;
                return true;
            }
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id.to_string(),
            PendingUpdate {
                progress,
                enqueued_at: now_millis,
                seq,
            },
        );
        true
    }

    /// Remove and return up to `max` entries, oldest first.
    ///
    /// Equal insertion stamps are ordered by arrival sequence.
    pub(crate) fn take_oldest(&mut self, max: Option<usize>) -> Vec<(String, u32)> {
        let mut order: Vec<(&String, &PendingUpdate)> = self.entries.iter().collect();
        order.sort_by_key(|(_, update)| (update.enqueued_at, update.seq));
        let ids: Vec<String> = order
            .into_iter()
            .take(max.unwrap_or(usize::MAX))
            .map(|(id, _)| id.clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| {
                self.entries
                    .remove(&id)
                    .map(|update| (id, update.progress))
            })
            .collect()
    }

    pub(crate) fn get(&self, id: &str) -> Option<u32> {
        self.entries.get(id).map(|update| update.progress)
    }

    pub(crate) fn remove(&mut self, id: &str) {
        self.entries.remove(id);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
