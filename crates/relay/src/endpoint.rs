//! Relay endpoint abstraction.
//!
//! The hub talks to relays through [`RelayEndpoint`], so the dispatch logic
//! is independent of the transport. Production uses the WebSocket
//! implementation in [`crate::connection`]; tests and local wiring use the
//! in-process relay in [`crate::memory`].

use crate::error::Result;
use async_trait::async_trait;
use dvm_protocol::{Event, Filter};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An open subscription on a single endpoint.
///
/// Dropping the receiver ends delivery; call
/// [`RelayEndpoint::unsubscribe`] to tell the relay.
pub struct Subscription {
    /// Subscription id, unique per endpoint.
    pub id: String,
    /// Delivered events, in arrival order.
    pub events: mpsc::Receiver<Event>,
}

/// A single relay the hub can publish to and subscribe on.
#[async_trait]
pub trait RelayEndpoint: Send + Sync {
    /// The endpoint's URL.
    fn url(&self) -> &str;

    /// Publish a signed event.
    async fn publish(&self, event: &Event) -> Result<()>;

    /// Open a subscription for the given filters.
    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription>;

    /// Close a subscription.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// Opens endpoints from URLs.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayEndpoint>>;
}
