//! Correlation table for in-flight event lookups.
//!
//! Several sessions can wait on the same referenced event id; one lookup
//! serves them all. Every resolution path (found, timed out, shut down)
//! removes the entry, so the table never leaks ids.

use dvm_protocol::Event;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Waiters keyed by the event id they are waiting for.
#[derive(Debug, Default)]
pub struct PendingFetches {
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Arc<Event>>>>>,
}

impl PendingFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for an event id.
    ///
    /// Returns the receiver and whether this is the first waiter for the
    /// id (the caller starts the lookup only in that case).
    pub async fn register(&self, id: &str) -> (oneshot::Receiver<Arc<Event>>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().await;
        let entry = waiters.entry(id.to_string()).or_default();
        let first = entry.is_empty();
        entry.push(tx);
        (rx, first)
    }

    /// Deliver the event to every waiter and remove the entry.
    pub async fn resolve(&self, id: &str, event: Arc<Event>) -> usize {
        let Some(senders) = self.waiters.lock().await.remove(id) else {
            return 0;
        };
        let count = senders.len();
        for tx in senders {
            // A waiter that gave up already dropped its receiver.
            let _ = tx.send(Arc::clone(&event));
        }
        count
    }

    /// Drop the entry without delivering; waiters observe a closed channel.
    pub async fn cancel(&self, id: &str) {
        self.waiters.lock().await.remove(id);
    }

    /// Whether a lookup is in flight for the id.
    pub async fn is_pending(&self, id: &str) -> bool {
        self.waiters.lock().await.contains_key(id)
    }

    /// Number of ids with in-flight lookups.
    pub async fn len(&self) -> usize {
        self.waiters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.waiters.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> Arc<Event> {
        Arc::new(Event {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "sig".to_string(),
        })
    }

    #[tokio::test]
    async fn test_first_waiter_flag() {
        let pending = PendingFetches::new();
        let (_rx1, first) = pending.register("ev1").await;
        assert!(first);
        let (_rx2, first) = pending.register("ev1").await;
        assert!(!first);
        let (_rx3, first) = pending.register("ev2").await;
        assert!(first);
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_all_waiters() {
        let pending = PendingFetches::new();
        let (rx1, _) = pending.register("ev1").await;
        let (rx2, _) = pending.register("ev1").await;

        assert_eq!(pending.resolve("ev1", event("ev1")).await, 2);
        assert_eq!(rx1.await.unwrap().id, "ev1");
        assert_eq!(rx2.await.unwrap().id, "ev1");
        assert!(!pending.is_pending("ev1").await);
    }

    #[tokio::test]
    async fn test_cancel_closes_waiters() {
        let pending = PendingFetches::new();
        let (rx, _) = pending.register("ev1").await;
        pending.cancel("ev1").await;
        assert!(rx.await.is_err());
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_noop() {
        let pending = PendingFetches::new();
        assert_eq!(pending.resolve("nope", event("nope")).await, 0);
    }

    #[tokio::test]
    async fn test_resolve_after_waiter_dropped() {
        let pending = PendingFetches::new();
        let (rx, _) = pending.register("ev1").await;
        drop(rx);
        // Send to the dropped waiter fails silently; the entry still clears.
        assert_eq!(pending.resolve("ev1", event("ev1")).await, 1);
        assert!(pending.is_empty().await);
    }
}
