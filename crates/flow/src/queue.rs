//! Sequence-ordered fragment delivery
//!
//! Buffers processed fragments and emits them in strict sequence order,
//! regardless of completion order. This queue is the only component allowed
//! to reorder results; emission is a strictly increasing sequence with no
//! duplicates.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use parking_lot::Mutex;
use tokio::sync::Notify;

use livedub_core::fragment::FragmentResult;

/// Diagnostic snapshot of sequence gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapInfo {
    pub expected: u64,
    pub available: Vec<u64>,
    pub missing: Vec<u64>,
}

struct HeapEntry(FragmentResult);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.sequence_number == other.0.sequence_number
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.sequence_number.cmp(&other.0.sequence_number)
    }
}

struct Inner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    seen: HashSet<u64>,
    next_expected: u64,
}

/// Min-heap on sequence number with duplicate detection and an async
/// in-order wait.
pub struct FragmentQueue {
    stream_id: String,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl FragmentQueue {
    pub fn new(stream_id: impl Into<String>, start_sequence: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                seen: HashSet::new(),
                next_expected: start_sequence,
            }),
            notify: Notify::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn next_expected(&self) -> u64 {
        self.inner.lock().next_expected
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Buffer a result. Duplicate sequence numbers are discarded.
    ///
    /// Returns true if the result was accepted.
    pub fn add_result(&self, result: FragmentResult) -> bool {
        let mut inner = self.inner.lock();
        let seq = result.sequence_number;
        if !inner.seen.insert(seq) {
            tracing::debug!(
                stream_id = %self.stream_id,
                sequence = seq,
                "duplicate fragment result discarded"
            );
            return false;
        }
        inner.heap.push(Reverse(HeapEntry(result)));
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Pop the next result iff its sequence number is the expected one.
    pub fn try_get_next(&self) -> Option<FragmentResult> {
        let mut inner = self.inner.lock();
        let head_seq = inner.heap.peek()?.0 .0.sequence_number;
        if head_seq != inner.next_expected {
            return None;
        }
        let result = inner.heap.pop().expect("head just peeked").0 .0;
        inner.next_expected += 1;
        Some(result)
    }

    /// Wait cooperatively until the next in-order result is available.
    pub async fn await_next(&self) -> FragmentResult {
        loop {
            let notified = self.notify.notified();
            if let Some(result) = self.try_get_next() {
                return result;
            }
            notified.await;
        }
    }

    /// Smallest buffered sequence number.
    pub fn peek_next_available(&self) -> Option<u64> {
        self.inner
            .lock()
            .heap
            .peek()
            .map(|entry| entry.0 .0.sequence_number)
    }

    /// Snapshot of available and missing sequences.
    pub fn gap_info(&self) -> GapInfo {
        let inner = self.inner.lock();
        let mut available: Vec<u64> = inner
            .heap
            .iter()
            .map(|entry| entry.0 .0.sequence_number)
            .collect();
        available.sort_unstable();

        let missing = match available.last() {
            None => Vec::new(),
            Some(&max_seq) => (inner.next_expected..=max_seq)
                .filter(|seq| !available.contains(seq))
                .collect(),
        };

        GapInfo {
            expected: inner.next_expected,
            available,
            missing,
        }
    }

    /// Drop all pending results and reset to the given baseline.
    pub fn clear(&self, start_sequence: u64) {
        let mut inner = self.inner.lock();
        inner.heap.clear();
        inner.seen.clear();
        inner.next_expected = start_sequence;
        drop(inner);
        self.notify.notify_waiters();
    }
}
