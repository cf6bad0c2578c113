//! Capacity-bounded timestamp window.

use std::collections::VecDeque;

/// Ordered admission timestamps (oldest first), never holding more than `capacity` entries.
///
/// The capacity is a backstop: the limiter never admits past its limit, so overflow only
/// happens if a caller pushes without checking first. On overflow the oldest entry is dropped.
#[derive(Debug, Clone)]
pub(crate) struct BoundedWindow {
    stamps: VecDeque<u64>,
    capacity: usize,
}

impl BoundedWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { stamps: VecDeque::new(), capacity }
    }

    /// Drop entries strictly older than `cutoff`, front first, stopping at the first fresh one.
    pub(crate) fn evict_older_than(&mut self, cutoff: u64) {
        while matches!(self.stamps.front(), Some(&ts) if ts < cutoff) {
            self.stamps.pop_front();
        }
    }

    /// Count entries at or after `cutoff` without evicting anything.
    pub(crate) fn count_since(&self, cutoff: u64) -> usize {
        // Sorted ascending, so the stale entries form a prefix.
        self.stamps.len() - self.stamps.partition_point(|&ts| ts < cutoff)
    }

    pub(crate) fn push(&mut self, ts: u64) {
        if self.stamps.len() == self.capacity {
            self.stamps.pop_front();
        }
        self.stamps.push_back(ts);
    }

    pub(crate) fn oldest(&self) -> Option<u64> {
        self.stamps.front().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.stamps.len()
    }

    pub(crate) fn clear(&mut self) {
        self.stamps.clear();
    }
}
