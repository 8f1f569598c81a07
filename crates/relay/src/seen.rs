//! Time-windowed duplicate suppression for event ids.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Remembers event ids seen within a sliding time window.
///
/// Entries older than the window are evicted on insert, so memory stays
/// proportional to event volume inside the window rather than total
/// uptime.
#[derive(Debug)]
pub struct SeenCache {
    window: Duration,
    ids: HashSet<String>,
    order: VecDeque<(u64, String)>,
}

impl SeenCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record an id at the current time. Returns `false` if the id was
    /// already seen inside the window.
    pub fn insert(&mut self, id: &str) -> bool {
        self.insert_at(id, dvm_protocol::unix_now())
    }

    /// Record an id at an explicit timestamp (seconds).
    pub fn insert_at(&mut self, id: &str, now: u64) -> bool {
        self.evict(now);
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back((now, id.to_string()));
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn evict(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window.as_secs());
        while let Some((at, _)) = self.order.front() {
            if *at >= cutoff {
                break;
            }
            if let Some((_, id)) = self.order.pop_front() {
                self.ids.remove(&id);
            }
        }
    }
}
