//! Worker capability.
//!
//! A worker owns the actual job logic and the provider identity it runs
//! under: its key (via the signing hook), its advertised profile and
//! version, and the kinds it handles. It reads inputs from the
//! [`JobContext`](crate::job::JobContext), streams status updates out, and
//! listens for engine signals (currently only payment completion) to
//! resume after a paywall.

use crate::job::JobContext;
use async_trait::async_trait;
use dvm_protocol::{Event, HandlerProfile, JobRequest, JobUpdate, UnsignedEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Signals the engine sends into a running worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSignal {
    /// The invoice for the last payment-required update settled.
    PaymentCompleted,
}

/// Executes jobs for one or more request kinds.
///
/// A worker that emits a payment-required update must park on `signals`
/// and wait for [`JobSignal::PaymentCompleted`] before continuing. The
/// session ends at the first terminal update; anything sent after it is
/// discarded.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Request kinds this worker handles.
    fn kinds(&self) -> Vec<u16>;

    /// The public key this worker publishes under. Used to recognize
    /// targeted requests and to attribute advertisements.
    fn public_key(&self) -> String;

    /// Handler version, used as the advertisement's `d` tag.
    fn version(&self) -> String {
        "0.1.0".to_string()
    }

    /// Display profile published as this worker's kind 0 metadata.
    fn profile(&self) -> HandlerProfile {
        HandlerProfile::default()
    }

    /// Explicit result kind for a request kind, overriding the default
    /// offset mapping.
    fn result_kind_override(&self, _request_kind: u16) -> Option<u16> {
        None
    }

    /// Whether this worker takes the job. A rejection is silent; other
    /// workers registered for the kind still get asked.
    async fn accept(&self, _request: &JobRequest) -> bool {
        true
    }

    /// Sign an event template with this worker's key.
    ///
    /// Every feedback, result and advertisement event for this worker's
    /// jobs goes through here; the engine itself holds no key material.
    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event>;

    /// Run one job to completion.
    ///
    /// `cancel` fires when the session is torn down; the worker must
    /// observe it at its next suspension point and return. An `Err`
    /// return is reported to the customer as an error feedback unless a
    /// terminal update was already sent.
    async fn run(
        &self,
        cancel: CancellationToken,
        ctx: JobContext,
        updates: mpsc::Sender<JobUpdate>,
        signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()>;
}
