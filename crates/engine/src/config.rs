//! Engine configuration.

use crate::error::{EngineError, Result};
use std::time::Duration;

/// Configuration for a dispatch engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relay URLs to connect to on startup. Must not be empty.
    pub relays: Vec<String>,

    /// How long an event-id lookup may run before the input is treated
    /// as unresolvable.
    pub fetch_timeout: Duration,

    /// Maximum concurrent job sessions. Requests beyond this are refused
    /// with an error feedback.
    pub max_sessions: usize,

    /// Window for duplicate suppression of incoming events.
    pub seen_window: Duration,

    /// Capacity of the merged intake stream.
    pub queue_depth: usize,

    /// Publish each worker's NIP-89 handler information and profile
    /// metadata on startup.
    pub advertise: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            fetch_timeout: Duration::from_secs(30),
            max_sessions: 64,
            seen_window: Duration::from_secs(300),
            queue_depth: 256,
            advertise: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.relays.is_empty() {
            return Err(EngineError::Config("at least one relay URL is required".to_string()));
        }
        if self.max_sessions == 0 {
            return Err(EngineError::Config("max_sessions must be at least 1".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(EngineError::Config("queue_depth must be at least 1".to_string()));
        }
        if self.fetch_timeout.is_zero() {
            return Err(EngineError::Config("fetch_timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}
