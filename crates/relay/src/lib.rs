//! Relay hub for the DVM dispatcher.
//!
//! Maintains connections to a set of relays and presents them as one
//! logical endpoint: publishes fan out everywhere, subscriptions merge
//! into a single deduplicated stream, and referenced events are resolved
//! by id with shared lookups.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod hub;
pub mod memory;
pub mod pending;
pub mod seen;

pub use connection::{WsConnector, WsRelayConnection};
pub use endpoint::{RelayConnector, RelayEndpoint, Subscription};
pub use error::{RelayError, Result};
pub use hub::{HubSubscription, RelayHub};
pub use memory::{MemoryConnector, MemoryRelay};
pub use pending::PendingFetches;
pub use seen::SeenCache;
