//! Nostr event structure (NIP-01).
//!
//! Events are the only record type on the wire. The dispatcher never signs
//! anything itself: it assembles an [`UnsignedEvent`] and hands it to a
//! worker's signing capability, which returns the finished [`Event`].

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// First value of the given tag, if the tag is present with at least
    /// one value.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// An event awaiting a signature.
///
/// The pubkey, id and sig fields are filled in by the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

impl UnsignedEvent {
    /// Create a template with the current time.
    pub fn new(kind: u16, tags: Vec<Vec<String>>, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags,
            content: content.into(),
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_tags(tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "pk".to_string(),
            created_at: 1,
            kind: 1,
            tags,
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn test_tag_value() {
        let event = event_with_tags(vec![
            vec!["e".to_string(), "abc".to_string()],
            vec!["p".to_string(), "def".to_string()],
        ]);
        assert_eq!(event.tag_value("e"), Some("abc"));
        assert_eq!(event.tag_value("p"), Some("def"));
        assert_eq!(event.tag_value("status"), None);
    }

    #[test]
    fn test_tag_value_empty_tag() {
        let event = event_with_tags(vec![vec!["e".to_string()]]);
        assert_eq!(event.tag_value("e"), None);
    }

    #[test]
    fn test_event_roundtrip_json() {
        let event = event_with_tags(vec![vec!["e".to_string(), "abc".to_string()]]);
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_unsigned_event_new() {
        let unsigned = UnsignedEvent::new(7000, vec![], "hello");
        assert_eq!(unsigned.kind, 7000);
        assert!(unsigned.created_at > 0);
        assert_eq!(unsigned.content, "hello");
    }
}
