//! In-memory history the server hands to new subscribers.
//!
//! Capacity is a server-wide ceiling, unrelated to any client's window.
//! When an append pushes past it the oldest events are dropped (FIFO).

use std::collections::VecDeque;

use crate::hook::HookEvent;

/// Append-only, size-bounded sequence of events in insertion order.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    capacity: usize,
    events: VecDeque<HookEvent>,
}

impl EventBuffer {
    /// A capacity of 0 is bumped to 1 so the buffer can always hold the latest event.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Push to the back, dropping from the front past capacity.
    pub fn append(&mut self, event: HookEvent) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    /// The last `min(n, len)` events, oldest first.
    pub fn most_recent(&self, n: usize) -> Vec<HookEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Events currently held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The fixed ceiling chosen at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Extend<HookEvent> for EventBuffer {
    fn extend<I: IntoIterator<Item = HookEvent>>(&mut self, iter: I) {
        for event in iter {
            self.append(event);
        }
    }
}
