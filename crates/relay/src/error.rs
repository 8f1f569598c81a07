//! Relay layer error types.

use thiserror::Error;

/// Errors from relay connections and the hub.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection timed out")]
    ConnectTimeout,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("no connected relay endpoints")]
    NoEndpoints,

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Protocol(#[from] dvm_protocol::ProtocolError),
}

/// Relay result type.
pub type Result<T> = std::result::Result<T, RelayError>;
