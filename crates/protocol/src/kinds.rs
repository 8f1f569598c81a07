//! NIP-90 kind ranges and the request-kind to result-kind mapping.
//!
//! Job requests live in 5000-5999, results in 6000-6999 (request kind plus
//! a fixed offset of 1000), feedback is the single kind 7000. Handler
//! advertisements (NIP-89) are kind 31990 and profile metadata is kind 0.

use std::collections::HashMap;

/// Kind range for job requests.
pub const JOB_REQUEST_KIND_MIN: u16 = 5000;
pub const JOB_REQUEST_KIND_MAX: u16 = 5999;

/// Kind range for job results.
pub const JOB_RESULT_KIND_MIN: u16 = 6000;
pub const JOB_RESULT_KIND_MAX: u16 = 6999;

/// Offset from a request kind to its default result kind.
pub const JOB_RESULT_KIND_OFFSET: u16 = 1000;

/// Kind for job feedback.
pub const KIND_JOB_FEEDBACK: u16 = 7000;

/// Kind for NIP-89 handler information.
pub const KIND_HANDLER_INFORMATION: u16 = 31990;

/// Kind for NIP-01 profile metadata.
pub const KIND_PROFILE_METADATA: u16 = 0;

// Well-known job request kinds.
pub const KIND_REQ_TEXT_EXTRACTION: u16 = 5000;
pub const KIND_REQ_TEXT_SUMMARIZATION: u16 = 5001;
pub const KIND_REQ_TEXT_TRANSLATION: u16 = 5002;
pub const KIND_REQ_TEXT_GENERATION: u16 = 5050;
pub const KIND_REQ_IMAGE_GENERATION: u16 = 5100;
pub const KIND_REQ_VIDEO_CONVERSION: u16 = 5200;
pub const KIND_REQ_VIDEO_TRANSLATION: u16 = 5201;
pub const KIND_REQ_TEXT_TO_SPEECH: u16 = 5250;
pub const KIND_REQ_CONTENT_DISCOVERY: u16 = 5300;
pub const KIND_REQ_NPUB_DISCOVERY: u16 = 5301;
pub const KIND_REQ_EVENT_COUNT: u16 = 5400;
pub const KIND_REQ_MALWARE_SCAN: u16 = 5500;
pub const KIND_REQ_APP_ANALYSIS: u16 = 5501;
pub const KIND_REQ_EVENT_TIMESTAMPING: u16 = 5900;
pub const KIND_REQ_BITCOIN_OP_RETURN: u16 = 5901;

/// Check if a kind is a job request kind.
pub fn is_job_request_kind(kind: u16) -> bool {
    (JOB_REQUEST_KIND_MIN..=JOB_REQUEST_KIND_MAX).contains(&kind)
}

/// Check if a kind is a job result kind.
pub fn is_job_result_kind(kind: u16) -> bool {
    (JOB_RESULT_KIND_MIN..=JOB_RESULT_KIND_MAX).contains(&kind)
}

/// Maps request kinds to the kind their result events are published under.
///
/// The default mapping is request kind + 1000. Overrides cover handlers
/// that declare an explicit result kind for a request kind.
#[derive(Debug, Clone, Default)]
pub struct ResultKindMap {
    overrides: HashMap<u16, u16>,
}

impl ResultKindMap {
    /// Mapping with no overrides (pure +1000 offset).
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an explicit result kind for a request kind.
    pub fn with_override(mut self, request_kind: u16, result_kind: u16) -> Self {
        self.overrides.insert(request_kind, result_kind);
        self
    }

    /// Result kind for a request kind, or `None` if the kind is not a
    /// job request kind.
    pub fn result_kind(&self, request_kind: u16) -> Option<u16> {
        if !is_job_request_kind(request_kind) {
            return None;
        }
        Some(
            self.overrides
                .get(&request_kind)
                .copied()
                .unwrap_or(request_kind + JOB_RESULT_KIND_OFFSET),
        )
    }
}
