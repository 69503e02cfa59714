//! Bounded statistics history

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded FIFO of statistics snapshots.
///
/// When full, pushing evicts the oldest entry. A capacity of zero disables
/// collection entirely. Draining is destructive: each snapshot is returned
/// to exactly one caller.
#[derive(Debug)]
pub struct StatsBuffer<T> {
    inner: Mutex<Ring<T>>,
}

#[derive(Debug)]
struct Ring<T> {
    entries: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> StatsBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                dropped: 0,
            }),
        }
    }

    /// Append a snapshot, evicting the oldest one if the buffer is full.
    ///
    /// Returns `false` if the snapshot was not retained (collection disabled).
    pub fn push(&self, entry: T) -> bool {
        let mut ring = self.inner.lock();
        if ring.capacity == 0 {
            return false;
        }
        if ring.entries.len() >= ring.capacity {
            ring.entries.pop_front();
            ring.dropped += 1;
        }
        ring.entries.push_back(entry);
        true
    }

    /// Take every retained snapshot, oldest first
    pub fn drain(&self) -> VecDeque<T> {
        std::mem::take(&mut self.inner.lock().entries)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Whether snapshots are collected at all
    pub fn is_enabled(&self) -> bool {
        self.capacity() > 0
    }

    /// Snapshots evicted before anyone drained them
    pub fn num_dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}
