//! Relay hub: a pool of endpoints behind one publish/subscribe surface.
//!
//! The hub fans publishes out to every connected endpoint, merges
//! subscription streams into one deduplicated stream, and resolves event
//! ids to events with shared, timeout-bounded lookups.

use crate::endpoint::{RelayConnector, RelayEndpoint};
use crate::error::{RelayError, Result};
use crate::pending::PendingFetches;
use crate::seen::SeenCache;
use dvm_protocol::{Event, Filter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A merged subscription across every hub endpoint.
///
/// Events arrive deduplicated; the same event relayed by several endpoints
/// is delivered once.
pub struct HubSubscription {
    /// Merged event stream.
    pub events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
}

impl HubSubscription {
    /// Close the subscription on every endpoint.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pool of relay endpoints.
pub struct RelayHub {
    connector: Arc<dyn RelayConnector>,
    endpoints: RwLock<HashMap<String, Arc<dyn RelayEndpoint>>>,
    seen: Arc<Mutex<SeenCache>>,
    pending: Arc<PendingFetches>,
    cancel: CancellationToken,
    queue_depth: usize,
}

impl RelayHub {
    pub fn new(
        connector: Arc<dyn RelayConnector>,
        seen_window: Duration,
        queue_depth: usize,
    ) -> Self {
        Self {
            connector,
            endpoints: RwLock::new(HashMap::new()),
            seen: Arc::new(Mutex::new(SeenCache::new(seen_window))),
            pending: Arc::new(PendingFetches::new()),
            cancel: CancellationToken::new(),
            queue_depth,
        }
    }

    /// Connect an endpoint. Already-connected URLs are a no-op.
    pub async fn connect(&self, url: &str) -> Result<()> {
        if self.endpoints.read().await.contains_key(url) {
            return Ok(());
        }
        let endpoint = self.connector.connect(url).await?;
        self.endpoints
            .write()
            .await
            .insert(url.to_string(), endpoint);
        debug!(url, "endpoint connected");
        Ok(())
    }

    /// Connect every URL, tolerating individual failures.
    ///
    /// Errs with [`RelayError::NoEndpoints`] only when none connect.
    pub async fn connect_all(&self, urls: &[String]) -> Result<usize> {
        let mut connected = 0;
        for url in urls {
            match self.connect(url).await {
                Ok(()) => connected += 1,
                Err(e) => warn!(%url, error = %e, "endpoint connection failed"),
            }
        }
        if connected == 0 {
            return Err(RelayError::NoEndpoints);
        }
        Ok(connected)
    }

    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }

    /// Publish to every connected endpoint.
    ///
    /// Succeeds when at least one endpoint accepted the send.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        let endpoints = self.snapshot().await;
        if endpoints.is_empty() {
            return Err(RelayError::NoEndpoints);
        }
        let mut delivered = 0;
        for endpoint in &endpoints {
            match endpoint.publish(event).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(url = endpoint.url(), error = %e, "publish failed"),
            }
        }
        if delivered == 0 {
            return Err(RelayError::ConnectionClosed);
        }
        Ok(())
    }

    /// Publish to the pool and to any extra relay URLs named by the
    /// request.
    ///
    /// Extras do not join the pool: each gets a short-lived connection in
    /// its own task, closed after the one send. Unreachable extras are
    /// skipped.
    pub async fn publish_with_hints(&self, event: &Event, hints: &[String]) -> Result<()> {
        for url in hints {
            if self.endpoints.read().await.contains_key(url) {
                continue;
            }
            let connector = Arc::clone(&self.connector);
            let url = url.clone();
            let event = event.clone();
            tokio::spawn(async move {
                match connector.connect(&url).await {
                    Ok(endpoint) => {
                        if let Err(e) = endpoint.publish(&event).await {
                            warn!(%url, error = %e, "hinted publish failed");
                        }
                        endpoint.close().await;
                    }
                    Err(e) => warn!(%url, error = %e, "hinted relay unreachable"),
                }
            });
        }
        self.publish(event).await
    }

    /// Subscribe on every endpoint and merge the streams, suppressing
    /// duplicate event ids across endpoints.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<HubSubscription> {
        let endpoints = self.snapshot().await;
        self.merge_subscribe(endpoints, filters, true).await
    }

    async fn merge_subscribe(
        &self,
        endpoints: Vec<Arc<dyn RelayEndpoint>>,
        filters: Vec<Filter>,
        dedup: bool,
    ) -> Result<HubSubscription> {
        if endpoints.is_empty() {
            return Err(RelayError::NoEndpoints);
        }

        let cancel = self.cancel.child_token();
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let mut opened = 0;

        for endpoint in endpoints {
            let sub = match endpoint.subscribe(filters.clone()).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(url = endpoint.url(), error = %e, "subscribe failed");
                    continue;
                }
            };
            opened += 1;
            let seen = dedup.then(|| Arc::clone(&self.seen));
            tokio::spawn(forward(endpoint, sub, tx.clone(), seen, cancel.clone()));
        }

        if opened == 0 {
            return Err(RelayError::NoEndpoints);
        }
        Ok(HubSubscription { events: rx, cancel })
    }

    /// Resolve an event id to the event.
    ///
    /// Concurrent callers for the same id share one lookup. Returns `None`
    /// when the event did not appear anywhere within the timeout.
    ///
    /// `timeout` bounds the shared lookup as a whole: it is armed by the
    /// first caller, and callers that join the lookup in flight share its
    /// remaining deadline rather than starting their own clock.
    pub async fn fetch_by_id(
        self: &Arc<Self>,
        id: &str,
        hints: &[String],
        timeout: Duration,
    ) -> Option<Arc<Event>> {
        let (rx, first) = self.pending.register(id).await;
        if first {
            tokio::spawn(run_lookup(
                Arc::clone(self),
                id.to_string(),
                hints.to_vec(),
                timeout,
            ));
        }
        rx.await.ok()
    }

    /// Cancel lookups and close every endpoint.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for endpoint in self.snapshot().await {
            endpoint.close().await;
        }
    }

    async fn snapshot(&self) -> Vec<Arc<dyn RelayEndpoint>> {
        self.endpoints.read().await.values().cloned().collect()
    }
}

async fn forward(
    endpoint: Arc<dyn RelayEndpoint>,
    mut sub: crate::endpoint::Subscription,
    tx: mpsc::Sender<Event>,
    seen: Option<Arc<Mutex<SeenCache>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = sub.events.recv() => match event {
                Some(event) => {
                    if let Some(seen) = &seen {
                        if !seen.lock().await.insert(&event.id) {
                            continue;
                        }
                    }
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    if let Err(e) = endpoint.unsubscribe(&sub.id).await {
        debug!(url = endpoint.url(), error = %e, "unsubscribe failed");
    }
}

async fn run_lookup(hub: Arc<RelayHub>, id: String, hints: Vec<String>, timeout: Duration) {
    // Hinted relays outside the pool get a short-lived connection for
    // this one lookup; they never join the pool.
    let mut extras: Vec<Arc<dyn RelayEndpoint>> = Vec::new();
    for url in &hints {
        if hub.endpoints.read().await.contains_key(url) {
            continue;
        }
        match hub.connector.connect(url).await {
            Ok(endpoint) => extras.push(endpoint),
            Err(e) => warn!(%url, error = %e, "hinted relay unreachable"),
        }
    }

    let mut endpoints = hub.snapshot().await;
    endpoints.extend(extras.iter().cloned());

    // Lookups bypass dedup: the target id may already be in the seen
    // cache from the main subscription stream.
    let filters = vec![Filter::new().ids(vec![id.clone()]).limit(1)];
    let mut sub = match hub.merge_subscribe(endpoints, filters, false).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!(%id, error = %e, "lookup subscribe failed");
            close_all(&extras).await;
            hub.pending.cancel(&id).await;
            return;
        }
    };

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut found = None;
    loop {
        tokio::select! {
            _ = hub.cancel.cancelled() => break,
            _ = &mut deadline => {
                debug!(%id, "lookup timed out");
                break;
            }
            event = sub.events.recv() => match event {
                Some(event) if event.id == id => {
                    found = Some(Arc::new(event));
                    break;
                }
                Some(_) => continue,
                None => break,
            },
        }
    }

    // Winds down the subscription on every endpoint, pooled or not.
    sub.close();
    close_all(&extras).await;
    match found {
        Some(event) => {
            hub.pending.resolve(&id, event).await;
        }
        None => hub.pending.cancel(&id).await,
    }
}

async fn close_all(endpoints: &[Arc<dyn RelayEndpoint>]) {
    for endpoint in endpoints {
        endpoint.close().await;
    }
}
