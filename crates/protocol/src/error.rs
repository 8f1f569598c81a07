//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid kind: {0} (expected {1})")]
    InvalidKind(u16, String),

    #[error("missing required tag: {0}")]
    MissingTag(String),

    #[error("invalid input type: {0}")]
    InvalidInputType(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid bid: {0}")]
    InvalidBid(String),

    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Protocol result type.
pub type Result<T> = std::result::Result<T, ProtocolError>;
