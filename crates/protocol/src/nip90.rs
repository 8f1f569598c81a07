//! NIP-90: Data Vending Machine job protocol.
//!
//! Translates between the wire tag layout of job request / feedback /
//! result events and the internal [`JobRequest`] / [`JobUpdate`]
//! representations.
//!
//! ## Protocol flow
//! 1. Customer publishes a job request (kind 5000-5999)
//! 2. Service providers publish job feedback events (kind 7000)
//! 3. On completion, the provider publishes a job result (kind 6000-6999)

use crate::error::{ProtocolError, Result};
use crate::event::{Event, UnsignedEvent};
use crate::kinds::{ResultKindMap, KIND_JOB_FEEDBACK};

/// Input type for a job request `i` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    /// Direct text input
    Text,
    /// A URL to fetch data from
    Url,
    /// A Nostr event ID
    Event,
    /// Output of another (possibly future) job
    Job,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Text => "text",
            InputType::Url => "url",
            InputType::Event => "event",
            InputType::Job => "job",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(InputType::Text),
            "url" => Ok(InputType::Url),
            "event" => Ok(InputType::Event),
            "job" => Ok(InputType::Job),
            _ => Err(ProtocolError::InvalidInputType(s.to_string())),
        }
    }

    /// Whether this input names another event that must be fetched before
    /// the input can be used.
    pub fn is_reference(&self) -> bool {
        matches!(self, InputType::Event | InputType::Job)
    }
}

/// Job status vocabulary, stable across the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Payment is required before the worker continues
    PaymentRequired,
    /// Settlement confirmed; forwarded to the worker, never published
    PaymentCompleted,
    /// The worker is processing the job
    Processing,
    /// Partial output; the session stays open for further updates
    Partial,
    /// The job finished successfully
    Success,
    /// The job finished; payment is requested on delivery
    SuccessWithPayment,
    /// The job failed
    Error,
}

impl JobStatus {
    /// Wire string for the feedback `status` tag.
    ///
    /// Both success variants publish as `success`; `PaymentCompleted` is
    /// internal-only and has no wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::PaymentRequired => "payment-required",
            JobStatus::PaymentCompleted => "payment-completed",
            JobStatus::Processing => "processing",
            JobStatus::Partial => "partial",
            JobStatus::Success | JobStatus::SuccessWithPayment => "success",
            JobStatus::Error => "error",
        }
    }

    /// Parse a published status string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "payment-required" => Ok(JobStatus::PaymentRequired),
            "processing" => Ok(JobStatus::Processing),
            "partial" => Ok(JobStatus::Partial),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            _ => Err(ProtocolError::InvalidStatus(s.to_string())),
        }
    }

    /// Whether the status ends a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::SuccessWithPayment | JobStatus::Error
        )
    }
}

/// An input for a job request (`i` tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    /// The input data/argument
    pub value: String,
    /// How to interpret the input
    pub input_type: InputType,
    /// Relay hint (for event/job types)
    pub relay: Option<String>,
    /// Optional marker for how the input should be used
    pub marker: Option<String>,
}

impl JobInput {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            input_type: InputType::Text,
            relay: None,
            marker: None,
        }
    }

    pub fn url(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            input_type: InputType::Url,
            relay: None,
            marker: None,
        }
    }

    pub fn event(id: impl Into<String>, relay: Option<String>) -> Self {
        Self {
            value: id.into(),
            input_type: InputType::Event,
            relay,
            marker: None,
        }
    }

    pub fn job(id: impl Into<String>, relay: Option<String>) -> Self {
        Self {
            value: id.into(),
            input_type: InputType::Job,
            relay,
            marker: None,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Encode as an `i` tag.
    ///
    /// The relay slot is an empty string when absent but a marker follows,
    /// so positional decoding stays unambiguous.
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "i".to_string(),
            self.value.clone(),
            self.input_type.as_str().to_string(),
        ];
        if self.relay.is_some() || self.marker.is_some() {
            tag.push(self.relay.clone().unwrap_or_default());
        }
        if let Some(marker) = &self.marker {
            tag.push(marker.clone());
        }
        tag
    }

    /// Decode from an `i` tag.
    ///
    /// A missing or empty type slot decodes as plain text.
    pub fn from_tag(tag: &[String]) -> Result<Self> {
        if tag.len() < 2 || tag[0] != "i" {
            return Err(ProtocolError::MissingTag(
                "i tag requires at least a value".to_string(),
            ));
        }
        let input_type = match tag.get(2).map(String::as_str) {
            None | Some("") => InputType::Text,
            Some(s) => InputType::parse(s)?,
        };
        Ok(Self {
            value: tag[1].clone(),
            input_type,
            relay: tag.get(3).filter(|s| !s.is_empty()).cloned(),
            marker: tag.get(4).filter(|s| !s.is_empty()).cloned(),
        })
    }
}

/// A decoded job request.
///
/// Immutable once decoded; shared across every session spawned for it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Event ID of the request
    pub id: String,
    /// Public key of the customer who published the request
    pub customer_pubkey: String,
    /// Request kind (5000-5999)
    pub kind: u16,
    /// Kind the result event is published under
    pub result_kind: u16,
    /// Ordered job inputs
    pub inputs: Vec<JobInput>,
    /// Job parameters, in tag order
    pub params: Vec<(String, String)>,
    /// Desired output descriptor (MIME type)
    pub output: Option<String>,
    /// Maximum bid in millisats
    pub bid_msats: Option<u64>,
    /// Relays where the customer wants responses published
    pub relays: Vec<String>,
    /// Tagged service-provider pubkeys (`p` tags)
    pub tagged_pubkeys: Vec<String>,
    /// The raw request event as JSON, echoed in the result's `request` tag
    pub request_json: String,
}

impl JobRequest {
    /// Decode a job request from its wire event.
    pub fn from_event(event: &Event, kinds: &ResultKindMap) -> Result<Self> {
        let result_kind = kinds
            .result_kind(event.kind)
            .ok_or_else(|| ProtocolError::InvalidKind(event.kind, "5000-5999".to_string()))?;

        let mut request = Self {
            id: event.id.clone(),
            customer_pubkey: event.pubkey.clone(),
            kind: event.kind,
            result_kind,
            inputs: Vec::new(),
            params: Vec::new(),
            output: None,
            bid_msats: None,
            relays: Vec::new(),
            tagged_pubkeys: Vec::new(),
            request_json: serde_json::to_string(event)?,
        };

        for tag in &event.tags {
            let Some(name) = tag.first() else { continue };
            match name.as_str() {
                "i" => request.inputs.push(JobInput::from_tag(tag)?),
                "output" => request.output = tag.get(1).cloned(),
                "param" => {
                    if let (Some(key), Some(value)) = (tag.get(1), tag.get(2)) {
                        request.params.push((key.clone(), value.clone()));
                    }
                }
                "bid" => {
                    let raw = tag.get(1).cloned().unwrap_or_default();
                    let bid = raw
                        .parse::<u64>()
                        .map_err(|_| ProtocolError::InvalidBid(raw))?;
                    request.bid_msats = Some(bid);
                }
                "relays" => request.relays.extend(tag.iter().skip(1).cloned()),
                "p" => {
                    if let Some(pk) = tag.get(1) {
                        request.tagged_pubkeys.push(pk.clone());
                    }
                }
                _ => {}
            }
        }

        Ok(request)
    }

    /// Value of a named parameter, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Event ids of every reference-type input, deduplicated, in input
    /// order.
    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for input in &self.inputs {
            if input.input_type.is_reference() && !ids.contains(&input.value) {
                ids.push(input.value.clone());
            }
        }
        ids
    }
}

/// A status update emitted by a worker, one per transition.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    /// The new status
    pub status: JobStatus,
    /// Amount in sats, meaningful for payment statuses
    pub amount_sats: u64,
    /// Lightning payment request, filled in by the engine
    pub payment_request: Option<String>,
    /// Result payload, meaningful for success statuses
    pub result: String,
    /// Failure description, published as the status tag's extra slot
    pub failure_msg: Option<String>,
    /// Extra tags appended verbatim to the published event
    pub extra_tags: Vec<Vec<String>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            amount_sats: 0,
            payment_request: None,
            result: String::new(),
            failure_msg: None,
            extra_tags: Vec::new(),
        }
    }

    pub fn payment_required(amount_sats: u64) -> Self {
        Self {
            amount_sats,
            ..Self::status(JobStatus::PaymentRequired)
        }
    }

    pub fn processing() -> Self {
        Self::status(JobStatus::Processing)
    }

    pub fn partial(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            ..Self::status(JobStatus::Partial)
        }
    }

    pub fn success(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            ..Self::status(JobStatus::Success)
        }
    }

    pub fn success_with_payment(result: impl Into<String>, amount_sats: u64) -> Self {
        Self {
            result: result.into(),
            amount_sats,
            ..Self::status(JobStatus::SuccessWithPayment)
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            failure_msg: Some(msg.into()),
            ..Self::status(JobStatus::Error)
        }
    }

    /// The `amount` tag value in millisats.
    pub fn amount_msats(&self) -> u64 {
        self.amount_sats * 1000
    }
}

/// Build the unsigned feedback event (kind 7000) for one update.
pub fn job_feedback_event(request: &JobRequest, update: &JobUpdate) -> UnsignedEvent {
    let mut status_tag = vec![
        "status".to_string(),
        update.status.as_str().to_string(),
    ];
    if let Some(extra) = &update.failure_msg {
        status_tag.push(extra.clone());
    }

    let mut tags = vec![
        vec!["e".to_string(), request.id.clone()],
        vec!["p".to_string(), request.customer_pubkey.clone()],
        status_tag,
    ];
    tags.extend(update.extra_tags.iter().cloned());

    if update.status == JobStatus::PaymentRequired {
        let mut amount_tag = vec!["amount".to_string(), update.amount_msats().to_string()];
        if let Some(payment_request) = &update.payment_request {
            amount_tag.push(payment_request.clone());
        }
        tags.push(amount_tag);
    }

    UnsignedEvent::new(KIND_JOB_FEEDBACK, tags, String::new())
}

/// Build the unsigned result event for a terminal success update.
///
/// The result echoes the serialized request, the `e`/`p` correlation tags
/// and every `i` tag; pay-on-delivery results carry an `amount` tag with
/// the invoice payment request.
pub fn job_result_event(request: &JobRequest, update: &JobUpdate) -> UnsignedEvent {
    let mut tags = vec![
        vec!["request".to_string(), request.request_json.clone()],
        vec!["e".to_string(), request.id.clone()],
        vec!["p".to_string(), request.customer_pubkey.clone()],
    ];
    tags.extend(update.extra_tags.iter().cloned());

    for input in &request.inputs {
        tags.push(input.to_tag());
    }

    if update.status == JobStatus::SuccessWithPayment {
        if let Some(payment_request) = &update.payment_request {
            tags.push(vec![
                "amount".to_string(),
                update.amount_msats().to_string(),
                payment_request.clone(),
            ]);
        }
    }

    UnsignedEvent::new(request.result_kind, tags, update.result.clone())
}
