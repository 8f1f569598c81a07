//! Engine error types.

use thiserror::Error;

/// Errors from the dispatch engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no workers registered")]
    NoWorkers,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("payment backend error: {0}")]
    Payment(String),

    #[error("payment backend not configured")]
    PaymentUnavailable,

    #[error(transparent)]
    Relay(#[from] dvm_relay::RelayError),

    #[error(transparent)]
    Protocol(#[from] dvm_protocol::ProtocolError),
}

/// Engine result type.
pub type Result<T> = std::result::Result<T, EngineError>;
