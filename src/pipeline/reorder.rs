//! Ordered release of out-of-order station results.

use std::collections::{BTreeMap, BTreeSet};

/// Buffers items keyed by a monotonic counter and releases them strictly
/// in order.
///
/// Concurrent stations finish out of order; downstream stages require
/// arrival order. Items are held until every predecessor has either
/// arrived or been explicitly skipped.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
    skipped: BTreeSet<u64>,
    next: u64,
}

impl<T> ReorderBuffer<T> {
    /// Creates a buffer expecting keys starting at `first`.
    pub fn new(first: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            skipped: BTreeSet::new(),
            next: first,
        }
    }

    /// Inserts an item and returns the run of items now releasable in
    /// order, possibly empty.
    pub fn insert(&mut self, key: u64, item: T) -> Vec<T> {
        self.pending.insert(key, item);
        self.release()
    }

    /// Marks `key` as permanently absent and returns any items unblocked
    /// by the gap. Skips may arrive for keys not yet due.
    pub fn skip(&mut self, key: u64) -> Vec<T> {
        self.pending.remove(&key);
        if key >= self.next {
            self.skipped.insert(key);
        }
        self.release()
    }

    /// Number of items waiting on a predecessor.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Releases everything still buffered, in key order, ignoring gaps.
    /// Used at drain time.
    pub fn drain(&mut self) -> Vec<T> {
        self.skipped.clear();
        std::mem::take(&mut self.pending).into_values().collect()
    }

    fn release(&mut self) -> Vec<T> {
        let mut released = Vec::new();
        loop {
            if let Some(item) = self.pending.remove(&self.next) {
                released.push(item);
                self.next += 1;
            } else if self.skipped.remove(&self.next) {
                self.next += 1;
            } else {
                break;
            }
        }
        released
    }
}
