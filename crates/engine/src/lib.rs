//! NIP-90 job dispatch engine.
//!
//! Listens for job requests on a relay hub, runs registered workers in
//! bounded concurrent sessions, resolves referenced-event inputs, and
//! publishes feedback and results, with optional Lightning payment flow.
//!
//! The engine holds no keys and speaks no Lightning itself: each
//! [`Worker`] carries its own identity and signing, and invoicing goes
//! through [`PaymentBackend`].

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod payment;
mod session;
pub mod worker;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use job::{InputError, JobContext, ResolvedInput};
pub use payment::{Invoice, PaymentBackend, Settlement};
pub use tokio_util::sync::CancellationToken;
pub use worker::{JobSignal, Worker};
