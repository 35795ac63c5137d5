//! Index-Based LRU List
//!
//! Unreferenced objects are queued by a monotonically increasing sequence
//! number. The oldest release sits at the front and is evicted first.
//! Removal by sequence is O(log n), so objects can leave the list when they
//! are referenced again without any pointer splicing.

use std::collections::BTreeMap;

use super::state::ObjectId;

/// Ordered queue of unreferenced objects
#[derive(Debug, Default)]
pub(crate) struct LruList {
    order: BTreeMap<u64, ObjectId>,
    next_seq: u64,
}

impl LruList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append `id` as the most recently released object
    pub(crate) fn push_back(&mut self, id: ObjectId) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id);
        seq
    }

    /// Remove the object queued under `seq`
    pub(crate) fn remove(&mut self, seq: u64) -> Option<ObjectId> {
        self.order.remove(&seq)
    }

    /// Dequeue the least recently released object
    pub(crate) fn pop_front(&mut self) -> Option<ObjectId> {
        self.order.pop_first().map(|(_, id)| id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

}

// =============================================================================
// Tests
// =============================================================================
