//! The dispatch engine.
//!
//! Connects the relay hub, advertises each worker, subscribes to job
//! requests and spawns a bounded number of concurrent sessions.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::job::{self, InputSlots, InputState, JobContext};
use crate::payment::PaymentBackend;
use crate::session::{self, SessionDeps};
use crate::worker::Worker;
use dvm_protocol::kinds::is_job_request_kind;
use dvm_protocol::{nip89, unix_now, Event, Filter, JobRequest, JobUpdate, ResultKindMap};
use dvm_relay::{RelayConnector, RelayHub};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A NIP-90 service provider engine.
pub struct Engine {
    config: EngineConfig,
    hub: Arc<RelayHub>,
    payments: Option<Arc<dyn PaymentBackend>>,
    workers: HashMap<u16, Vec<Arc<dyn Worker>>>,
    roster: Vec<Arc<dyn Worker>>,
    kinds: ResultKindMap,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig, connector: Arc<dyn RelayConnector>) -> Result<Self> {
        config.validate()?;
        let hub = Arc::new(RelayHub::new(
            connector,
            config.seen_window,
            config.queue_depth,
        ));
        let permits = Arc::new(Semaphore::new(config.max_sessions));
        Ok(Self {
            config,
            hub,
            payments: None,
            workers: HashMap::new(),
            roster: Vec::new(),
            kinds: ResultKindMap::new(),
            permits,
            cancel: CancellationToken::new(),
        })
    }

    /// Attach a payment backend. Without one, payment-requiring jobs fail
    /// with an error feedback.
    pub fn with_payment_backend(mut self, backend: Arc<dyn PaymentBackend>) -> Self {
        self.payments = Some(backend);
        self
    }

    /// Register a worker for every kind it declares.
    ///
    /// Several workers may share a kind; each accepting worker gets its
    /// own session per request. Registration happens before [`Self::run`];
    /// the registry is read-only afterwards.
    pub fn register_worker(&mut self, worker: Arc<dyn Worker>) -> Result<()> {
        let kinds = worker.kinds();
        for kind in &kinds {
            if !is_job_request_kind(*kind) {
                return Err(EngineError::Config(format!(
                    "kind {kind} is not a job request kind"
                )));
            }
            if let Some(result_kind) = worker.result_kind_override(*kind) {
                let current = self.kinds.result_kind(*kind);
                if current.is_some_and(|c| c != result_kind) && self.overridden(*kind) {
                    return Err(EngineError::Config(format!(
                        "conflicting result kind for request kind {kind}"
                    )));
                }
                self.kinds = std::mem::take(&mut self.kinds).with_override(*kind, result_kind);
            }
        }
        for kind in kinds {
            self.workers.entry(kind).or_default().push(Arc::clone(&worker));
        }
        self.roster.push(worker);
        Ok(())
    }

    fn overridden(&self, kind: u16) -> bool {
        self.kinds.result_kind(kind) != ResultKindMap::new().result_kind(kind)
    }

    /// Every registered request kind, ascending.
    pub fn handled_kinds(&self) -> Vec<u16> {
        let mut kinds: Vec<u16> = self.workers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// The hub, for callers that publish or fetch directly.
    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Request shutdown: the intake loop stops and every session and
    /// lookup is cancelled.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the dispatcher until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if self.workers.is_empty() {
            return Err(EngineError::NoWorkers);
        }
        self.hub.connect_all(&self.config.relays).await?;
        if self.config.advertise {
            self.advertise().await?;
        }

        let kinds = self.handled_kinds();
        let filter = Filter::new().kinds(kinds.clone()).since(unix_now());
        let mut sub = self.hub.subscribe(vec![filter]).await?;
        info!(?kinds, relays = self.config.relays.len(), "dispatcher listening");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = sub.events.recv() => match event {
                    // Dispatch runs off the intake loop: worker acceptance
                    // and refusal publishes must not hold up other jobs.
                    Some(event) => {
                        let engine = Arc::clone(self);
                        tokio::spawn(async move { engine.dispatch(event).await });
                    }
                    None => {
                        warn!("intake stream ended");
                        break;
                    }
                },
            }
        }

        self.hub.shutdown().await;
        Ok(())
    }

    /// Publish each worker's NIP-89 handler information and kind 0
    /// profile, signed with that worker's own key.
    pub async fn advertise(&self) -> Result<()> {
        for worker in &self.roster {
            let profile = worker.profile();
            let version = worker.version();
            let mut kinds = worker.kinds();
            kinds.sort_unstable();
            kinds.dedup();

            let metadata = nip89::profile_metadata_event(&profile)?;
            let handler = nip89::handler_information_event(&profile, &version, &kinds)?;
            for unsigned in [metadata, handler] {
                let event = worker
                    .sign(unsigned)
                    .await
                    .map_err(|e| EngineError::Signing(e.to_string()))?;
                self.hub.publish(&event).await?;
            }
            info!(pubkey = %worker.public_key(), %version, "handler advertisement published");
        }
        Ok(())
    }

    async fn dispatch(&self, event: Event) {
        let Some(candidates) = self.workers.get(&event.kind) else {
            debug!(id = %event.id, kind = event.kind, "no worker for kind");
            return;
        };

        let request = match JobRequest::from_event(&event, &self.kinds) {
            Ok(request) => Arc::new(request),
            Err(e) => {
                warn!(id = %event.id, error = %e, "undecodable job request");
                return;
            }
        };

        // Each accepting worker gets a session with its own input slots,
        // but a referenced event id is fetched once per request.
        let mut merged: HashMap<String, Vec<watch::Sender<InputState>>> = HashMap::new();
        let mut sessions: Vec<(Arc<dyn Worker>, JobContext)> = Vec::new();
        for worker in candidates {
            // Targeted requests are only for the providers they name.
            if !request.tagged_pubkeys.is_empty()
                && !request.tagged_pubkeys.contains(&worker.public_key())
            {
                debug!(job = %request.id, pubkey = %worker.public_key(), "request targets another provider");
                continue;
            }
            if !worker.accept(&request).await {
                debug!(job = %request.id, "worker declined job");
                continue;
            }
            let (ctx, slots) = job::build_context(Arc::clone(&request));
            for (id, senders) in slots.by_id {
                merged.entry(id).or_default().extend(senders);
            }
            sessions.push((Arc::clone(worker), ctx));
        }
        if sessions.is_empty() {
            debug!(job = %request.id, "no worker accepted job");
            return;
        }

        self.spawn_fetches(&request, InputSlots { by_id: merged });

        for (worker, ctx) in sessions {
            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(job = %request.id, "session capacity reached, refusing job");
                    self.refuse(worker, &request, "too many concurrent jobs").await;
                    break;
                }
            };
            let deps = SessionDeps {
                hub: Arc::clone(&self.hub),
                worker,
                payments: self.payments.clone(),
            };
            tokio::spawn(session::run_session(
                deps,
                Arc::clone(&request),
                ctx,
                self.cancel.child_token(),
                permit,
            ));
        }
    }

    /// One lookup per distinct referenced event id; each fills every slot
    /// waiting on that id when it lands or times out.
    fn spawn_fetches(&self, request: &Arc<JobRequest>, slots: InputSlots) {
        let timeout = self.config.fetch_timeout;
        for (id, senders) in slots.by_id {
            let hints: Vec<String> = request
                .inputs
                .iter()
                .filter(|input| input.value == id)
                .filter_map(|input| input.relay.clone())
                .collect();
            let hub = Arc::clone(&self.hub);
            tokio::spawn(async move {
                let mut slots = InputSlots {
                    by_id: HashMap::from([(id.clone(), senders)]),
                };
                match hub.fetch_by_id(&id, &hints, timeout).await {
                    Some(event) => slots.resolve(&id, &event),
                    None => slots.fail(&id, "referenced event not found"),
                }
            });
        }
    }

    async fn refuse(&self, worker: Arc<dyn Worker>, request: &Arc<JobRequest>, msg: &str) {
        let deps = SessionDeps {
            hub: Arc::clone(&self.hub),
            worker,
            payments: self.payments.clone(),
        };
        if let Err(e) = session::publish_feedback(&deps, request, &JobUpdate::error(msg)).await {
            debug!(job = %request.id, error = %e, "refusal feedback not delivered");
        }
    }
}
