//! In-memory doubles for the transport and REST seams
//!
//! [`ScriptedConnector`] hands out WebSocket sessions whose server side is
//! driven by the test. [`StaticGateway`] serves canned snapshots with
//! optional failure injection.

use crate::errors::{ExchangeError, Result};
use crate::traits::{SnapshotProvider, UserStreamProvider};
use crate::transport::ChannelSpec;
use crate::types::{CanonicalOrder, CanonicalPosition};
use crate::websocket::{WsConnection, WsConnector, WsMessage};

use async_trait::async_trait;
use monoio::time::Instant;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use url::Url;

/// What the fake server does next
#[derive(Debug, Clone)]
pub enum ServerAction {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Close(Option<u16>),
    /// Fail the next read as if the socket died
    Drop,
}

#[derive(Default)]
struct SessionState {
    url: Option<Url>,
    sent: Vec<String>,
    pongs: Vec<Vec<u8>>,
    closed: bool,
}

/// Server-side view of one accepted connection
#[derive(Clone)]
pub struct ScriptedSession {
    state: Rc<RefCell<SessionState>>,
    actions: flume::Sender<ServerAction>,
}

impl ScriptedSession {
    pub fn push(&self, action: ServerAction) {
        let _ = self.actions.send(action);
    }

    /// Shorthand for pushing a text frame
    pub fn send_text(&self, text: impl Into<String>) {
        self.push(ServerAction::Text(text.into()));
    }

    /// Text frames the client sent, in order
    pub fn sent(&self) -> Vec<String> {
        self.state.borrow().sent.clone()
    }

    pub fn pongs(&self) -> Vec<Vec<u8>> {
        self.state.borrow().pongs.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn url(&self) -> Option<Url> {
        self.state.borrow().url.clone()
    }
}

struct ScriptedConnection {
    state: Rc<RefCell<SessionState>>,
    actions: flume::Receiver<ServerAction>,
}

impl ScriptedConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.state.borrow().closed {
            return Err(ExchangeError::ConnectionFailed("socket closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl WsConnection for ScriptedConnection {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.ensure_open()?;
        self.state.borrow_mut().sent.push(text.to_string());
        Ok(())
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.state.borrow_mut().pongs.push(payload);
        Ok(())
    }

    async fn recv_until(&mut self, deadline: Option<Instant>) -> Result<Option<WsMessage>> {
        self.ensure_open()?;
        let next = match deadline {
            Some(at) => monoio::select! {
                action = self.actions.recv_async() => action,
                _ = monoio::time::sleep_until(at) => return Ok(None),
            },
            None => self.actions.recv_async().await,
        };
        let action = next.map_err(|_| ExchangeError::ConnectionFailed("script ended".to_string()))?;
        match action {
            ServerAction::Text(text) => Ok(Some(WsMessage::Text(text))),
            ServerAction::Binary(bytes) => Ok(Some(WsMessage::Binary(bytes))),
            ServerAction::Ping(payload) => Ok(Some(WsMessage::Ping(payload))),
            ServerAction::Close(code) => Ok(Some(WsMessage::Close(code))),
            ServerAction::Drop => {
                self.state.borrow_mut().closed = true;
                Err(ExchangeError::ConnectionFailed("connection reset".to_string()))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct ConnectorState {
    sessions: Vec<ScriptedSession>,
    attempts: usize,
    fail_next: usize,
}

/// Connector whose sessions are scripted by the test
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Rc<RefCell<ConnectorState>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next_connects(&self, n: usize) {
        self.state.borrow_mut().fail_next = n;
    }

    /// Attempts so far, failed ones included
    pub fn connect_count(&self) -> usize {
        self.state.borrow().attempts
    }

    /// Successful connection `index`, in accept order
    pub fn session(&self, index: usize) -> Option<ScriptedSession> {
        self.state.borrow().sessions.get(index).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.borrow().sessions.len()
    }

    pub fn last_session(&self) -> Option<ScriptedSession> {
        self.state.borrow().sessions.last().cloned()
    }
}

#[async_trait(?Send)]
impl WsConnector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn WsConnection>> {
        let mut state = self.state.borrow_mut();
        state.attempts += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ExchangeError::ConnectionFailed(format!("refused: {url}")));
        }

        let (tx, rx) = flume::unbounded();
        let shared = Rc::new(RefCell::new(SessionState {
            url: Some(url.clone()),
            ..Default::default()
        }));
        state.sessions.push(ScriptedSession {
            state: shared.clone(),
            actions: tx,
        });
        Ok(Box::new(ScriptedConnection {
            state: shared,
            actions: rx,
        }))
    }
}

#[derive(Default)]
struct GatewayState {
    orders: Vec<CanonicalOrder>,
    positions: Vec<CanonicalPosition>,
    orders_error: Option<ExchangeError>,
    positions_error: Option<ExchangeError>,
    channel_error: Option<ExchangeError>,
}

/// Canned snapshots plus a fixed user channel spec
#[derive(Clone)]
pub struct StaticGateway {
    spec: ChannelSpec,
    keepalive_every: Option<Duration>,
    channel_delay: Option<Duration>,
    state: Rc<RefCell<GatewayState>>,
    order_fetches: Rc<Cell<usize>>,
    position_fetches: Rc<Cell<usize>>,
    channel_requests: Rc<Cell<usize>>,
    keepalives: Rc<Cell<usize>>,
}

impl StaticGateway {
    pub fn new(spec: ChannelSpec) -> Self {
        Self {
            spec,
            keepalive_every: None,
            channel_delay: None,
            state: Rc::default(),
            order_fetches: Rc::default(),
            position_fetches: Rc::default(),
            channel_requests: Rc::default(),
            keepalives: Rc::default(),
        }
    }

    pub fn with_keepalive(mut self, every: Duration) -> Self {
        self.keepalive_every = Some(every);
        self
    }

    /// Slow down user channel requests so concurrent callers overlap
    pub fn with_channel_delay(mut self, delay: Duration) -> Self {
        self.channel_delay = Some(delay);
        self
    }

    pub fn with_orders(self, orders: Vec<CanonicalOrder>) -> Self {
        self.set_orders(orders);
        self
    }

    pub fn with_positions(self, positions: Vec<CanonicalPosition>) -> Self {
        self.set_positions(positions);
        self
    }

    pub fn set_orders(&self, orders: Vec<CanonicalOrder>) {
        self.state.borrow_mut().orders = orders;
    }

    pub fn set_positions(&self, positions: Vec<CanonicalPosition>) {
        self.state.borrow_mut().positions = positions;
    }

    /// Every order fetch fails until [`StaticGateway::clear_failures`]
    pub fn fail_orders(&self, err: ExchangeError) {
        self.state.borrow_mut().orders_error = Some(err);
    }

    pub fn fail_positions(&self, err: ExchangeError) {
        self.state.borrow_mut().positions_error = Some(err);
    }

    pub fn fail_channel(&self, err: ExchangeError) {
        self.state.borrow_mut().channel_error = Some(err);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.borrow_mut();
        state.orders_error = None;
        state.positions_error = None;
        state.channel_error = None;
    }

    pub fn order_fetches(&self) -> usize {
        self.order_fetches.get()
    }

    pub fn position_fetches(&self) -> usize {
        self.position_fetches.get()
    }

    pub fn channel_requests(&self) -> usize {
        self.channel_requests.get()
    }

    pub fn keepalive_count(&self) -> usize {
        self.keepalives.get()
    }
}

#[async_trait(?Send)]
impl SnapshotProvider for StaticGateway {
    async fn get_open_orders(&self) -> Result<Vec<CanonicalOrder>> {
        self.order_fetches.set(self.order_fetches.get() + 1);
        let state = self.state.borrow();
        match &state.orders_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.orders.clone()),
        }
    }

    async fn get_open_positions(&self) -> Result<Vec<CanonicalPosition>> {
        self.position_fetches.set(self.position_fetches.get() + 1);
        let state = self.state.borrow();
        match &state.positions_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.positions.clone()),
        }
    }
}

#[async_trait(?Send)]
impl UserStreamProvider for StaticGateway {
    async fn user_channel_spec(&self) -> Result<ChannelSpec> {
        self.channel_requests.set(self.channel_requests.get() + 1);
        if let Some(delay) = self.channel_delay {
            monoio::time::sleep(delay).await;
        }
        match &self.state.borrow().channel_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.spec.clone()),
        }
    }

    fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_every
    }

    async fn keepalive(&self) -> Result<()> {
        self.keepalives.set(self.keepalives.get() + 1);
        Ok(())
    }
}
