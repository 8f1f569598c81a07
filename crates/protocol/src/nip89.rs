//! NIP-89: handler advertisement events.
//!
//! A service provider announces the job kinds it handles with a kind 31990
//! handler information event, and publishes its display profile as kind 0
//! metadata.

use crate::error::Result;
use crate::event::UnsignedEvent;
use crate::kinds::{KIND_HANDLER_INFORMATION, KIND_PROFILE_METADATA};
use serde::{Deserialize, Serialize};

/// Display profile for a service provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerProfile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub about: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub picture: String,
}

impl HandlerProfile {
    pub fn new(name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
            picture: String::new(),
        }
    }
}

/// Build the unsigned kind 31990 handler information event.
///
/// The `d` tag carries the handler version so re-publishing replaces the
/// previous advertisement; each supported request kind gets a `k` tag.
pub fn handler_information_event(
    profile: &HandlerProfile,
    version: &str,
    kinds: &[u16],
) -> Result<UnsignedEvent> {
    let mut tags = vec![vec!["d".to_string(), version.to_string()]];
    for kind in kinds {
        tags.push(vec!["k".to_string(), kind.to_string()]);
    }
    Ok(UnsignedEvent::new(
        KIND_HANDLER_INFORMATION,
        tags,
        serde_json::to_string(profile)?,
    ))
}

/// Build the unsigned kind 0 profile metadata event.
pub fn profile_metadata_event(profile: &HandlerProfile) -> Result<UnsignedEvent> {
    Ok(UnsignedEvent::new(
        KIND_PROFILE_METADATA,
        vec![],
        serde_json::to_string(profile)?,
    ))
}
