//! Wire types for the NIP-90 data vending machine protocol.
//!
//! This crate is pure data: Nostr events and relay frames (NIP-01),
//! subscription filters, the job request / feedback / result tag layouts
//! (NIP-90) and handler advertisements (NIP-89). No I/O and no signing
//! happen here.

pub mod error;
pub mod event;
pub mod filter;
pub mod kinds;
pub mod message;
pub mod nip89;
pub mod nip90;

pub use error::{ProtocolError, Result};
pub use event::{unix_now, Event, UnsignedEvent};
pub use filter::Filter;
pub use kinds::{is_job_request_kind, is_job_result_kind, ResultKindMap, KIND_JOB_FEEDBACK};
pub use message::{ClientMessage, RelayMessage};
pub use nip89::HandlerProfile;
pub use nip90::{InputType, JobInput, JobRequest, JobStatus, JobUpdate};
