//! Min-priority request queue.
//!
//! Lower priority values are served first, ties in submission order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::QueuedRequest;

/// A request waiting in the queue.
#[derive(Debug)]
pub(crate) struct Entry {
    pub seq: u64,
    pub attempts: u32,
    pub request: QueuedRequest,
}

impl Entry {
    fn key(&self) -> (i32, u64) {
        (self.request.priority, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap: the smallest (priority, seq) must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fresh request behind every queued request of the same priority.
    pub fn push(&mut self, request: QueuedRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            seq,
            attempts: 0,
            request,
        });
    }

    /// Put a popped entry back at its original place.
    pub fn requeue(&mut self, entry: Entry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<Entry> {
        self.heap.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
