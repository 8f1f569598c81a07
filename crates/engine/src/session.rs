//! Job session: drives one worker run and publishes its lifecycle.
//!
//! The session loop multiplexes three sources: worker updates, settlement
//! outcomes from invoice trackers, and cancellation. Every suspension
//! point also selects on the cancellation token, so shutdown can reach a
//! session whatever it is waiting on. Teardown is cooperative: the worker
//! gets its own child token and the session waits for it to return
//! instead of aborting its task.
//!
//! State rules:
//! - `PaymentRequired` gets an invoice attached before the feedback goes
//!   out; settlement resumes the worker with a payment-completed signal.
//!   That signal is internal and never published.
//! - `Processing` and `Partial` publish feedback and keep the session
//!   open.
//! - `Success` publishes feedback then the result; `SuccessWithPayment`
//!   does the same with an invoice on the result. Both terminate.
//! - `Error` publishes feedback and terminates.

use crate::error::{EngineError, Result};
use crate::job::JobContext;
use crate::payment::{PaymentBackend, Settlement};
use crate::worker::{JobSignal, Worker};
use dvm_protocol::nip90::{job_feedback_event, job_result_event};
use dvm_protocol::{JobRequest, JobStatus, JobUpdate};
use dvm_relay::RelayHub;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 16;
const SIGNAL_CHANNEL_CAPACITY: usize = 4;

/// Handles a session needs to run, publish and charge.
pub(crate) struct SessionDeps {
    pub hub: Arc<RelayHub>,
    pub worker: Arc<dyn Worker>,
    pub payments: Option<Arc<dyn PaymentBackend>>,
}

pub(crate) async fn run_session(
    deps: SessionDeps,
    request: Arc<JobRequest>,
    ctx: JobContext,
    cancel: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    let _permit = permit;
    let (updates_tx, mut updates_rx) = mpsc::channel::<JobUpdate>(UPDATE_CHANNEL_CAPACITY);
    let (signals_tx, signals_rx) = mpsc::channel::<JobSignal>(SIGNAL_CHANNEL_CAPACITY);
    // The session keeps one sender alive so this channel never reads as
    // closed while invoice trackers come and go.
    let (settle_tx, mut settle_rx) = mpsc::channel::<Settlement>(SIGNAL_CHANNEL_CAPACITY);

    debug!(job = %request.id, kind = request.kind, "session started");

    let worker_cancel = cancel.child_token();
    let worker_handle = {
        let worker = Arc::clone(&deps.worker);
        let worker_cancel = worker_cancel.clone();
        tokio::spawn(async move { worker.run(worker_cancel, ctx, updates_tx, signals_rx).await })
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job = %request.id, "session cancelled");
                publish_error_best_effort(&deps, &request, "job cancelled").await;
                // `worker_cancel` is a child of `cancel`, already fired.
                let _ = worker_handle.await;
                return;
            }
            update = updates_rx.recv() => match update {
                Some(update) => {
                    match handle_update(&deps, &request, update, &settle_tx, &cancel).await {
                        Ok(false) => continue,
                        Ok(true) => {
                            worker_cancel.cancel();
                            let _ = worker_handle.await;
                            debug!(job = %request.id, "session finished");
                            return;
                        }
                        Err(e) => {
                            warn!(job = %request.id, error = %e, "session failed");
                            publish_error_best_effort(&deps, &request, &e.to_string()).await;
                            worker_cancel.cancel();
                            let _ = worker_handle.await;
                            return;
                        }
                    }
                }
                // Worker dropped its sender; fall through to inspect how
                // it ended.
                None => break,
            },
            settlement = settle_rx.recv() => match settlement {
                Some(Settlement::Settled) => {
                    debug!(job = %request.id, "invoice settled");
                    if signals_tx.send(JobSignal::PaymentCompleted).await.is_err() {
                        warn!(job = %request.id, "worker gone before payment signal");
                        break;
                    }
                }
                Some(Settlement::Expired) => {
                    publish_error_best_effort(&deps, &request, "invoice expired unpaid").await;
                    worker_cancel.cancel();
                    let _ = worker_handle.await;
                    return;
                }
                // Cannot close: `settle_tx` lives until this function
                // returns. Nothing to do if it somehow reads as empty.
                None => continue,
            },
        }
    }

    match worker_handle.await {
        Ok(Ok(())) => {
            debug!(job = %request.id, "worker finished without terminal update");
        }
        Ok(Err(e)) => {
            warn!(job = %request.id, error = %e, "worker failed");
            publish_error_best_effort(&deps, &request, &e.to_string()).await;
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            warn!(job = %request.id, error = %e, "worker panicked");
            publish_error_best_effort(&deps, &request, "internal worker failure").await;
        }
    }
}

/// Apply one worker update. Returns `true` when the update was terminal.
async fn handle_update(
    deps: &SessionDeps,
    request: &JobRequest,
    mut update: JobUpdate,
    settle_tx: &mpsc::Sender<Settlement>,
    cancel: &CancellationToken,
) -> Result<bool> {
    match update.status {
        JobStatus::PaymentCompleted => {
            // Engine-to-worker only; a worker emitting it is a bug.
            warn!(job = %request.id, "worker emitted payment-completed, ignoring");
            Ok(false)
        }
        JobStatus::PaymentRequired => {
            let backend = deps
                .payments
                .as_ref()
                .ok_or(EngineError::PaymentUnavailable)?;
            let invoice = backend
                .create_invoice(update.amount_sats, &format!("job {}", request.id))
                .await
                .map_err(|e| EngineError::Payment(e.to_string()))?;
            update.payment_request = Some(invoice.payment_request.clone());
            publish_feedback(deps, request, &update).await?;

            tokio::spawn(track_settlement(
                Arc::clone(backend),
                invoice.payment_hash,
                settle_tx.clone(),
                cancel.clone(),
            ));
            Ok(false)
        }
        JobStatus::Processing | JobStatus::Partial => {
            publish_feedback(deps, request, &update).await?;
            Ok(false)
        }
        JobStatus::Success => {
            publish_feedback(deps, request, &update).await?;
            publish_result(deps, request, &update).await?;
            Ok(true)
        }
        JobStatus::SuccessWithPayment => {
            let backend = deps
                .payments
                .as_ref()
                .ok_or(EngineError::PaymentUnavailable)?;
            let invoice = backend
                .create_invoice(update.amount_sats, &format!("job {}", request.id))
                .await
                .map_err(|e| EngineError::Payment(e.to_string()))?;
            update.payment_request = Some(invoice.payment_request.clone());
            publish_feedback(deps, request, &update).await?;
            publish_result(deps, request, &update).await?;
            Ok(true)
        }
        JobStatus::Error => {
            publish_feedback(deps, request, &update).await?;
            Ok(true)
        }
    }
}

async fn track_settlement(
    backend: Arc<dyn PaymentBackend>,
    payment_hash: String,
    settle_tx: mpsc::Sender<Settlement>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        outcome = backend.await_settlement(&payment_hash) => {
            let settlement = match outcome {
                Ok(settlement) => settlement,
                Err(e) => {
                    warn!(%payment_hash, error = %e, "settlement tracking failed");
                    Settlement::Expired
                }
            };
            let _ = settle_tx.send(settlement).await;
        }
    }
}

pub(crate) async fn publish_feedback(
    deps: &SessionDeps,
    request: &JobRequest,
    update: &JobUpdate,
) -> Result<()> {
    let unsigned = job_feedback_event(request, update);
    let event = deps
        .worker
        .sign(unsigned)
        .await
        .map_err(|e| EngineError::Signing(e.to_string()))?;
    deps.hub.publish_with_hints(&event, &request.relays).await?;
    debug!(job = %request.id, status = update.status.as_str(), "feedback published");
    Ok(())
}

async fn publish_result(
    deps: &SessionDeps,
    request: &JobRequest,
    update: &JobUpdate,
) -> Result<()> {
    let unsigned = job_result_event(request, update);
    let event = deps
        .worker
        .sign(unsigned)
        .await
        .map_err(|e| EngineError::Signing(e.to_string()))?;
    deps.hub.publish_with_hints(&event, &request.relays).await?;
    debug!(job = %request.id, kind = request.result_kind, "result published");
    Ok(())
}

async fn publish_error_best_effort(deps: &SessionDeps, request: &JobRequest, msg: &str) {
    if let Err(e) = publish_feedback(deps, request, &JobUpdate::error(msg)).await {
        debug!(job = %request.id, error = %e, "error feedback not delivered");
    }
}
