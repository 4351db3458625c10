//! The client's locally held slice of the stream.
//!
//! Order is arrival order, never the events' own timestamps. Trimming
//! always drops from the front, so the contents are always a suffix of
//! everything received.

use std::collections::VecDeque;

use crate::hook::HookEvent;

#[derive(Debug, Clone)]
pub struct ClientWindow {
    max: usize,
    events: VecDeque<HookEvent>,
}

impl ClientWindow {
    /// An empty window holding at most `max` (at least 1) events.
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            events: VecDeque::new(),
        }
    }

    /// Current window size.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Change the window size (at least 1) and trim immediately if over.
    /// Growing never backfills.
    pub fn set_max(&mut self, max: usize) -> usize {
        self.max = max.max(1);
        self.trim();
        self.max
    }

    /// Replace everything with a baseline batch, keeping only its tail.
    pub fn replace_all(&mut self, events: Vec<HookEvent>) {
        let skip = events.len().saturating_sub(self.max);
        self.events = events.into_iter().skip(skip).collect();
    }

    /// Push a live event, then trim from the front.
    pub fn append(&mut self, event: HookEvent) {
        self.events.push_back(event);
        self.trim();
    }

    /// Drop every held event. The window size is kept.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HookEvent> {
        self.events.iter()
    }

    /// An owned copy of the held events, oldest first.
    pub fn snapshot(&self) -> Vec<HookEvent> {
        self.events.iter().cloned().collect()
    }

    fn trim(&mut self) {
        while self.events.len() > self.max {
            self.events.pop_front();
        }
    }
}
