//! Fixed-capacity ring buffer of recent snapshots.
//!
//! Single writer (the engine worker), many readers (observer hydration).
//! Readers take the lock only long enough to copy; a reader observes the
//! state before a push or strictly after it, never a torn write.

use std::sync::RwLock;

use crate::model::Snapshot;

pub struct SnapshotRing {
    inner: RwLock<Inner>,
}

struct Inner {
    data: Vec<Snapshot>,
    head: usize,
    size: usize,
}

impl SnapshotRing {
    /// Create a ring with fixed capacity. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            inner: RwLock::new(Inner {
                data: vec![Snapshot::default(); capacity],
                head: 0,
                size: 0,
            }),
        }
    }

    /// Insert a snapshot, overwriting the oldest slot when full. O(1).
    pub fn push(&self, snapshot: Snapshot) {
        let mut inner = self.inner.write().unwrap();
        let capacity = inner.data.len();
        let head = inner.head;
        inner.data[head] = snapshot;
        inner.head = (head + 1) % capacity;
        if inner.size < capacity {
            inner.size += 1;
        }
    }

    /// Copy of all snapshots in insertion order, oldest first. O(N).
    pub fn snapshot_all(&self) -> Vec<Snapshot> {
        let inner = self.inner.read().unwrap();
        let capacity = inner.data.len();
        let mut out = Vec::with_capacity(inner.size);
        if inner.size < capacity {
            out.extend_from_slice(&inner.data[..inner.size]);
        } else {
            // Head points at the oldest slot once the ring has wrapped.
            out.extend_from_slice(&inner.data[inner.head..]);
            out.extend_from_slice(&inner.data[..inner.head]);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().unwrap().data.len()
    }
}
