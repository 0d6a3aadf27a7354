//! Scroll event queue with per-user cooldown.

use std::collections::HashMap;

use crate::types::{AuthorId, ScrollEvent, Timestamp};

/// Time-sorted, bounded queue of pending scroll events.
///
/// An event is superseded by a later event from the same user within the
/// cooldown. Survivors are released once they are older than the cooldown,
/// so no event that could still supersede them can be missing.
#[derive(Debug, Clone)]
pub struct ScrollEventQueue {
    cooldown_ms: i64,
    capacity: usize,
    pending: Vec<ScrollEvent>,
    dropped: u64,
}

impl ScrollEventQueue {
    /// Create an empty queue.
    pub fn new(cooldown_ms: i64, capacity: usize) -> Self {
        Self {
            cooldown_ms,
            capacity: capacity.max(1),
            pending: Vec::new(),
            dropped: 0,
        }
    }

    /// Queue a batch, in any order. Returns how many events were evicted to
    /// respect the capacity.
    pub fn push_batch(&mut self, events: impl IntoIterator<Item = ScrollEvent>) -> usize {
        self.pending.extend(events);
        // Stable, so equal timestamps keep arrival order.
        self.pending.sort_by_key(|e| e.timestamp);

        let overflow = self.pending.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.pending.drain(..overflow);
            self.dropped += overflow as u64;
            tracing::warn!(
                evicted = overflow,
                capacity = self.capacity,
                "scroll queue full, evicting oldest events"
            );
        }
        overflow
    }

    /// Drop superseded events and return those old enough to apply, sorted
    /// by timestamp.
    pub fn release(&mut self, now: Timestamp) -> Vec<ScrollEvent> {
        self.collapse();
        let cutoff = self
            .pending
            .partition_point(|e| now - e.timestamp > self.cooldown_ms);
        self.pending.drain(..cutoff).collect()
    }

    fn collapse(&mut self) {
        let mut next_by_user: HashMap<AuthorId, Timestamp> = HashMap::new();
        let mut keep = vec![true; self.pending.len()];
        for (i, event) in self.pending.iter().enumerate().rev() {
            if let Some(&later) = next_by_user.get(&event.user) {
                if later - event.timestamp < self.cooldown_ms {
                    keep[i] = false;
                }
            }
            next_by_user.insert(event.user.clone(), event.timestamp);
        }
        let mut flags = keep.into_iter();
        self.pending.retain(|_| flags.next().unwrap_or(true));
    }

    /// Events still waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Events evicted for capacity since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
