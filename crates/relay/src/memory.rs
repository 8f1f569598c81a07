//! In-process relay.
//!
//! Implements [`RelayEndpoint`] over plain channels: events published or
//! injected are stored and fanned out to matching subscriptions, and new
//! subscriptions replay matching stored events first, the way a real relay
//! serves stored history before live delivery.
//!
//! Used by the test suites and for single-process wiring.

use crate::endpoint::{RelayConnector, RelayEndpoint, Subscription};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use dvm_protocol::{Event, Filter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct MemoryState {
    stored: Vec<Event>,
    published: Vec<Event>,
    subscriptions: HashMap<String, (Vec<Filter>, mpsc::Sender<Event>)>,
}

/// An in-process relay endpoint.
pub struct MemoryRelay {
    url: String,
    state: Mutex<MemoryState>,
}

impl MemoryRelay {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            state: Mutex::new(MemoryState::default()),
        })
    }

    /// Deliver an event as if a remote client published it to this relay.
    pub async fn inject(&self, event: Event) {
        self.deliver(event).await;
    }

    /// Events published through the [`RelayEndpoint`] interface, in order.
    pub async fn published(&self) -> Vec<Event> {
        self.state.lock().await.published.clone()
    }

    /// Number of open subscriptions.
    pub async fn active_subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    async fn deliver(&self, event: Event) {
        let mut state = self.state.lock().await;
        state.stored.push(event.clone());
        state.subscriptions.retain(|_, (filters, tx)| {
            if filters.iter().any(|f| f.matches(&event)) {
                // A full or closed channel drops the subscription.
                tx.try_send(event.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }
}

#[async_trait]
impl RelayEndpoint for MemoryRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        self.state.lock().await.published.push(event.clone());
        self.deliver(event.clone()).await;
        Ok(())
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut state = self.state.lock().await;
        // Stored events matching the filters replay before live delivery.
        for event in &state.stored {
            if filters.iter().any(|f| f.matches(event)) {
                let _ = tx.try_send(event.clone());
            }
        }
        state.subscriptions.insert(id.clone(), (filters, tx));

        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.state.lock().await.subscriptions.remove(subscription_id);
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().await.subscriptions.clear();
    }
}

/// Connector serving pre-registered [`MemoryRelay`] instances by URL.
#[derive(Default)]
pub struct MemoryConnector {
    relays: Mutex<HashMap<String, Arc<MemoryRelay>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a relay under the given URL.
    pub async fn register(&self, url: impl Into<String>) -> Arc<MemoryRelay> {
        let url = url.into();
        let relay = MemoryRelay::new(url.clone());
        self.relays
            .lock()
            .await
            .insert(url, Arc::clone(&relay));
        relay
    }
}

#[async_trait]
impl RelayConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayEndpoint>> {
        self.relays
            .lock()
            .await
            .get(url)
            .map(|r| Arc::clone(r) as Arc<dyn RelayEndpoint>)
            .ok_or_else(|| RelayError::Connect(format!("unknown relay: {url}")))
    }
}
