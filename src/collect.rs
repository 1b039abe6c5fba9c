use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::storage::PartitionCursor;

/// One pending entry from a single partition's cursor, ordered so that
/// `BinaryHeap` (a max-heap) surfaces the smallest key first.
struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

/// Produces the union of every partition's entries in ascending key order
/// by k-way merging their already-sorted cursors.
///
/// Each partition contributes at most one entry to the heap at a time, so
/// memory use stays proportional to the partition count rather than the
/// total row count.
pub struct MergeCollector {
    cursors: Vec<PartitionCursor>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeCollector {
    pub fn new(mut cursors: Vec<PartitionCursor>) -> MergeCollector {
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (source, cursor) in cursors.iter_mut().enumerate() {
            if let Some((key, value)) = cursor.next() {
                heap.push(HeapEntry { key, value, source });
            }
        }
        MergeCollector { cursors, heap }
    }
}

impl Iterator for MergeCollector {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let HeapEntry { key, value, source } = self.heap.pop()?;
        if let Some((k, v)) = self.cursors[source].next() {
            self.heap.push(HeapEntry {
                key: k,
                value: v,
                source,
            });
        }
        Some((key, value))
    }
}
