//! Transport manager
//!
//! One physical WebSocket per subscription. The first connect attempt is
//! reported to the caller; after that the channel task owns the connection
//! and keeps it alive forever with a fixed reconnect delay, replaying the
//! venue handshake (auth + subscribe) on every reconnect.
//!
//! State machine per subscription:
//!
//! ```text
//! Connecting --ok--> Open --drop--> Reconnecting --ok--> Open
//!     |                |                 |
//!     +--err--> Closed +--disconnect-->  +--disconnect--> Closed
//! ```

use crate::auth::Credentials;
use crate::errors::{ExchangeError, Result};
use crate::normalizer::Normalizer;
use crate::types::{CanonicalEvent, ChannelKind, ConnectionStatus, Venue};
use crate::websocket::{TlsWsConnector, WsConnection, WsConnector, WsMessage};
use crate::{binance, bybit};
use omnisync_core::{generate_id_with_prefix, PerfTimer};

use monoio::time::Instant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Connection timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Client heartbeat interval for venues that expect client pings
    pub ping_interval_ms: u64,
    /// Bound on a single connect + handshake attempt
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
            ping_interval_ms: 20_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_ping_interval_ms(mut self, interval_ms: u64) -> Self {
        self.ping_interval_ms = interval_ms;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }
}

/// Keepalive policy of a channel
#[derive(Debug, Clone, PartialEq)]
pub enum Heartbeat {
    /// Server sends pings, we answer with pongs
    ServerPing,
    /// We send this text frame every `ping_interval_ms`
    ClientPing { payload: String },
}

/// Where to connect and what to replay after every connect
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub venue: Venue,
    pub kind: ChannelKind,
    pub url: Url,
    pub topics: Vec<String>,
    /// Present for channels that authenticate with a frame after connect
    pub credentials: Option<Credentials>,
    pub heartbeat: Heartbeat,
}

impl ChannelSpec {
    /// Frames to send after each (re)connect, auth first.
    ///
    /// Regenerated per attempt so signed auth frames carry a fresh expiry.
    pub fn handshake_frames(&self) -> Result<Vec<String>> {
        match self.venue {
            Venue::BinanceFutures => binance::streams::handshake_frames(self),
            Venue::Bybit => bybit::streams::handshake_frames(self),
        }
    }

    fn label(&self) -> String {
        format!("{}/{}", self.venue, self.kind)
    }
}

/// Caller's handle on one subscription
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: String,
    closed: Arc<AtomicBool>,
    stop_tx: flume::Sender<()>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop the channel and any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The task may already be gone
        let _ = self.stop_tx.try_send(());
        debug!("🔌 Disconnect requested for {}", self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

type Registry = Arc<Mutex<HashMap<String, SubscriptionHandle>>>;

/// Owns every live subscription of one client
#[derive(Clone)]
pub struct StreamClient {
    connector: Arc<dyn WsConnector>,
    config: TransportConfig,
    registry: Registry,
}

impl StreamClient {
    /// Client over real `wss://` connections
    pub fn new(config: TransportConfig) -> Self {
        Self::with_connector(Arc::new(TlsWsConnector::new()), config)
    }

    pub fn with_connector(connector: Arc<dyn WsConnector>, config: TransportConfig) -> Self {
        Self {
            connector,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open a raw channel.
    ///
    /// Resolves once the first connection and its handshake succeed; a
    /// failure of that first attempt is returned and nothing is retried.
    pub async fn open<M, S>(&self, spec: ChannelSpec, on_message: M, on_status: S) -> Result<SubscriptionHandle>
    where
        M: Fn(&str) + 'static,
        S: Fn(ConnectionStatus) + 'static,
    {
        let id = generate_id_with_prefix("sub");
        let label = spec.label();
        let _timer = PerfTimer::start("channel_open");

        on_status(ConnectionStatus::Connecting);
        let conn = match connect_once(&*self.connector, &spec, &self.config).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("❌ [{}] initial connect failed: {}", label, e);
                on_status(ConnectionStatus::Closed);
                return Err(e);
            }
        };
        on_status(ConnectionStatus::Open);
        info!("✅ [{}] channel {} open ({} topics)", label, id, spec.topics.len());

        let (stop_tx, stop_rx) = flume::bounded(1);
        let handle = SubscriptionHandle {
            id: id.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            stop_tx,
        };
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), handle.clone());

        let task = ChannelTask {
            id,
            label,
            spec,
            connector: self.connector.clone(),
            config: self.config.clone(),
            on_message: Box::new(on_message),
            on_status: Box::new(on_status),
            stop_rx,
            closed: handle.closed.clone(),
            registry: self.registry.clone(),
        };
        monoio::spawn(task.run(conn));

        Ok(handle)
    }

    /// Open a channel whose frames pass through the venue normalizer.
    ///
    /// Control frames never reach `on_event`; malformed frames are dropped
    /// with a warning and the connection stays up.
    pub async fn subscribe<E, S>(&self, spec: ChannelSpec, on_event: E, on_status: S) -> Result<SubscriptionHandle>
    where
        E: Fn(CanonicalEvent) + 'static,
        S: Fn(ConnectionStatus) + 'static,
    {
        let normalizer = Normalizer::new(spec.venue, spec.kind);
        self.open(
            spec,
            move |raw| match normalizer.normalize(raw) {
                Ok(Some(event)) => on_event(event),
                Ok(None) => {}
                Err(e) => warn!("⚠️  Dropping {} message: {}", normalizer, e),
            },
            on_status,
        )
        .await
    }

    /// Disconnect one subscription; false if the id is unknown
    pub fn close_by_id(&self, id: &str) -> bool {
        let handle = self.registry.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
        match handle {
            Some(handle) => {
                handle.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnect every subscription and clear the registry
    pub fn close_all_sockets(&self) {
        let handles: Vec<_> = self
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        info!("🔌 Closing {} sockets", handles.len());
        for handle in handles {
            handle.disconnect();
        }
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// One connect + handshake attempt, bounded by `connect_timeout_ms`
async fn connect_once(
    connector: &dyn WsConnector,
    spec: &ChannelSpec,
    config: &TransportConfig,
) -> Result<Box<dyn WsConnection>> {
    let frames = spec.handshake_frames()?;
    let attempt = async {
        let mut conn = connector.connect(&spec.url).await?;
        for frame in &frames {
            conn.send_text(frame).await?;
        }
        Ok::<_, ExchangeError>(conn)
    };

    match monoio::time::timeout(Duration::from_millis(config.connect_timeout_ms), attempt).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout(format!(
            "connect to {} exceeded {}ms",
            spec.url.host_str().unwrap_or_default(),
            config.connect_timeout_ms
        ))),
    }
}

enum SessionEnd {
    Stopped,
    Dropped(ExchangeError),
}

enum Step {
    Stop,
    Heartbeat,
    Inbound(Result<WsMessage>),
}

struct ChannelTask {
    id: String,
    label: String,
    spec: ChannelSpec,
    connector: Arc<dyn WsConnector>,
    config: TransportConfig,
    on_message: Box<dyn Fn(&str)>,
    on_status: Box<dyn Fn(ConnectionStatus)>,
    stop_rx: flume::Receiver<()>,
    closed: Arc<AtomicBool>,
    registry: Registry,
}

impl ChannelTask {
    async fn run(self, mut conn: Box<dyn WsConnection>) {
        loop {
            match self.drive(&mut *conn).await {
                SessionEnd::Stopped => {
                    let _ = conn.close().await;
                    break;
                }
                SessionEnd::Dropped(reason) => {
                    warn!("⚠️  [{}] connection lost: {}", self.label, reason);
                    let _ = conn.close().await;
                }
            }

            match self.reconnect().await {
                Some(next) => conn = next,
                None => break,
            }
        }

        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
        (self.on_status)(ConnectionStatus::Closed);
        info!("⏹️  [{}] channel {} closed", self.label, self.id);
    }

    fn stopped(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pump one connection until it drops or the handle disconnects
    async fn drive(&self, conn: &mut dyn WsConnection) -> SessionEnd {
        let ping_every = match self.spec.heartbeat {
            Heartbeat::ClientPing { .. } => Some(Duration::from_millis(self.config.ping_interval_ms)),
            Heartbeat::ServerPing => None,
        };
        let mut next_ping = ping_every.map(|every| Instant::now() + every);

        loop {
            if self.stopped() {
                return SessionEnd::Stopped;
            }

            // The ping deadline is enforced inside the read, which keeps
            // partial frames; only a stop may abandon it
            let step = monoio::select! {
                _ = self.stop_rx.recv_async() => Step::Stop,
                msg = conn.recv_until(next_ping) => match msg {
                    Ok(Some(msg)) => Step::Inbound(Ok(msg)),
                    Ok(None) => Step::Heartbeat,
                    Err(e) => Step::Inbound(Err(e)),
                },
            };

            match step {
                Step::Stop => return SessionEnd::Stopped,
                Step::Heartbeat => {
                    if let Heartbeat::ClientPing { payload } = &self.spec.heartbeat {
                        if let Err(e) = conn.send_text(payload).await {
                            return SessionEnd::Dropped(e);
                        }
                        debug!("💓 [{}] ping sent", self.label);
                    }
                    next_ping = ping_every.map(|every| Instant::now() + every);
                }
                Step::Inbound(Ok(WsMessage::Text(text))) => (self.on_message)(&text),
                Step::Inbound(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => (self.on_message)(&text),
                    Err(_) => warn!("⚠️  [{}] dropping non UTF-8 binary frame", self.label),
                },
                Step::Inbound(Ok(WsMessage::Ping(payload))) => {
                    if let Err(e) = conn.send_pong(payload).await {
                        return SessionEnd::Dropped(e);
                    }
                }
                Step::Inbound(Ok(WsMessage::Pong(_))) => {}
                Step::Inbound(Ok(WsMessage::Close(code))) => {
                    return SessionEnd::Dropped(ExchangeError::ConnectionFailed(format!(
                        "closed by peer (code {code:?})"
                    )));
                }
                Step::Inbound(Err(e)) => return SessionEnd::Dropped(e),
            }
        }
    }

    /// Retry forever with a constant delay; `None` once disconnected
    async fn reconnect(&self) -> Option<Box<dyn WsConnection>> {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        (self.on_status)(ConnectionStatus::Reconnecting);

        let mut attempt: u64 = 0;
        loop {
            if self.stopped() {
                return None;
            }

            let interrupted = monoio::select! {
                _ = monoio::time::sleep(delay) => false,
                _ = self.stop_rx.recv_async() => true,
            };
            if interrupted || self.stopped() {
                return None;
            }

            attempt += 1;
            let outcome = monoio::select! {
                result = connect_once(&*self.connector, &self.spec, &self.config) => Some(result),
                _ = self.stop_rx.recv_async() => None,
            };

            match outcome {
                None => return None,
                Some(Ok(conn)) => {
                    if self.stopped() {
                        let mut conn = conn;
                        let _ = conn.close().await;
                        return None;
                    }
                    info!("🔄 [{}] reconnected after {} attempt(s)", self.label, attempt);
                    (self.on_status)(ConnectionStatus::Open);
                    return Some(conn);
                }
                Some(Err(e)) => {
                    warn!(
                        "⚠️  [{}] reconnect attempt {} failed: {}, retrying in {}ms",
                        self.label, attempt, e, self.config.reconnect_delay_ms
                    );
                }
            }
        }
    }
}
