//! WebSocket relay endpoint.
//!
//! One connection per relay: a writer half guarded by a mutex and a
//! background read loop that routes EVENT frames to their subscription
//! channels.

use crate::endpoint::{RelayConnector, RelayEndpoint, Subscription};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use dvm_protocol::{ClientMessage, Event, Filter, RelayMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Per-subscription delivery channel capacity.
const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 64;

/// A live WebSocket connection to one relay.
pub struct WsRelayConnection {
    url: String,
    writer: Mutex<WsWriter>,
    subscriptions: Arc<Mutex<HashMap<String, mpsc::Sender<Event>>>>,
    cancel: CancellationToken,
}

impl WsRelayConnection {
    /// Connect to a relay at a `ws://` or `wss://` URL.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Arc<Self>> {
        let parsed = Url::parse(url).map_err(|e| RelayError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(RelayError::InvalidUrl(format!(
                "expected ws:// or wss:// scheme, got {}",
                parsed.scheme()
            )));
        }

        let (stream, _) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| RelayError::ConnectTimeout)??;
        let (writer, reader) = stream.split();

        let conn = Arc::new(Self {
            url: url.to_string(),
            writer: Mutex::new(writer),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(read_loop(
            conn.url.clone(),
            reader,
            Arc::clone(&conn.subscriptions),
            conn.cancel.clone(),
        ));

        debug!(url, "relay connected");
        Ok(conn)
    }

    async fn send(&self, frame: String) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(RelayError::from)
    }
}

#[async_trait]
impl RelayEndpoint for WsRelayConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        let frame = ClientMessage::Event(event.clone()).to_json()?;
        self.send(frame).await
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        self.subscriptions.lock().await.insert(id.clone(), tx);

        let frame = ClientMessage::Req {
            subscription_id: id.clone(),
            filters,
        }
        .to_json()?;

        if let Err(e) = self.send(frame).await {
            self.subscriptions.lock().await.remove(&id);
            return Err(e);
        }

        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.subscriptions.lock().await.remove(subscription_id);
        let frame = ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        }
        .to_json()?;
        self.send(frame).await
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.subscriptions.lock().await.clear();
        let _ = self.writer.lock().await.close().await;
    }
}

async fn read_loop(
    url: String,
    mut reader: WsReader,
    subscriptions: Arc<Mutex<HashMap<String, mpsc::Sender<Event>>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = reader.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&url, &text, &subscriptions).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(%url, "relay closed connection");
                    break;
                }
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(e)) => {
                    warn!(%url, error = %e, "relay read error");
                    break;
                }
            },
        }
    }
    // Dropping the senders lets downstream consumers observe the close.
    subscriptions.lock().await.clear();
}

async fn handle_frame(
    url: &str,
    text: &str,
    subscriptions: &Mutex<HashMap<String, mpsc::Sender<Event>>>,
) {
    let message = match RelayMessage::from_json(text) {
        Ok(Some(message)) => message,
        Ok(None) => return,
        Err(e) => {
            warn!(url, error = %e, "unparseable relay frame");
            return;
        }
    };

    match message {
        RelayMessage::Event {
            subscription_id,
            event,
        } => {
            let subs = subscriptions.lock().await;
            if let Some(tx) = subs.get(&subscription_id) {
                if tx.try_send(event).is_err() {
                    warn!(url, %subscription_id, "subscription channel full, dropping event");
                }
            }
        }
        RelayMessage::Ok {
            event_id,
            success,
            message,
        } => {
            if success {
                debug!(url, %event_id, "publish accepted");
            } else {
                warn!(url, %event_id, %message, "publish rejected");
            }
        }
        RelayMessage::Eose { subscription_id } => {
            debug!(url, %subscription_id, "end of stored events");
        }
        RelayMessage::Closed {
            subscription_id,
            message,
        } => {
            warn!(url, %subscription_id, %message, "subscription closed by relay");
            subscriptions.lock().await.remove(&subscription_id);
        }
        RelayMessage::Notice { message } => {
            warn!(url, %message, "relay notice");
        }
    }
}

/// Opens [`WsRelayConnection`] endpoints.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayEndpoint>> {
        let conn = WsRelayConnection::connect(url, self.connect_timeout).await?;
        Ok(conn as Arc<dyn RelayEndpoint>)
    }
}
