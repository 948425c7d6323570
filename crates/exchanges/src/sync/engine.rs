//! User-data reconciliation engine
//!
//! Merges REST snapshots and private stream events into one
//! [`UserDataState`] per account session and fans changes out to
//! per-instance observers. State and observer registries sit behind
//! mutexes; observers always run after the lock is released so they may
//! call back into the engine.

use super::state::{OrderChange, UserDataState};
use crate::errors::{ExchangeError, Result, SnapshotPart};
use crate::traits::AccountGateway;
use crate::transport::{StreamClient, SubscriptionHandle};
use crate::types::*;
use omnisync_core::PerfTimer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Engine behavior per account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub position_mode: PositionMode,
    /// Re-pull both snapshots after every stream reconnect
    pub resync_on_reconnect: bool,
}

impl EngineConfig {
    pub fn new(position_mode: PositionMode) -> Self {
        Self {
            position_mode,
            resync_on_reconnect: false,
        }
    }

    pub fn with_resync_on_reconnect(mut self, enabled: bool) -> Self {
        self.resync_on_reconnect = enabled;
        self
    }
}

type OrderObserver = Arc<dyn Fn(&str, &[CanonicalOrder])>;
type PositionObserver = Arc<dyn Fn(&str, &[CanonicalPosition])>;
type SessionErrorObserver = Arc<dyn Fn(&ExchangeError)>;
type ReconnectObserver = Arc<dyn Fn()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverKind {
    Order,
    Position,
    SessionError,
    Reconnect,
}

#[derive(Default)]
struct Observers {
    orders: BTreeMap<u64, OrderObserver>,
    positions: BTreeMap<u64, PositionObserver>,
    session_errors: BTreeMap<u64, SessionErrorObserver>,
    reconnects: BTreeMap<u64, ReconnectObserver>,
}

impl Observers {
    fn remove(&mut self, kind: ObserverKind, id: u64) -> bool {
        match kind {
            ObserverKind::Order => self.orders.remove(&id).is_some(),
            ObserverKind::Position => self.positions.remove(&id).is_some(),
            ObserverKind::SessionError => self.session_errors.remove(&id).is_some(),
            ObserverKind::Reconnect => self.reconnects.remove(&id).is_some(),
        }
    }

    fn clear(&mut self) {
        self.orders.clear();
        self.positions.clear();
        self.session_errors.clear();
        self.reconnects.clear();
    }
}

/// Private channel bookkeeping
#[derive(Default)]
struct ChannelSlot {
    handle: Option<SubscriptionHandle>,
    keepalive_stop: Option<flume::Sender<()>>,
    reconnecting: bool,
    /// One caller subscribes at a time; the rest park here for its outcome
    opening: bool,
    waiters: Vec<flume::Sender<Result<()>>>,
}

/// Ends an in-flight open. Runs on drop so a cancelled `init` still
/// releases the slot and wakes every waiter.
struct OpeningGuard<'a> {
    slot: &'a Mutex<ChannelSlot>,
    outcome: Option<Result<()>>,
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        let waiters = {
            let mut slot = lock(self.slot);
            slot.opening = false;
            std::mem::take(&mut slot.waiters)
        };
        let outcome = self.outcome.take().unwrap_or_else(|| {
            Err(ExchangeError::ConnectionFailed("user channel open cancelled".to_string()))
        });
        for waiter in waiters {
            let _ = waiter.try_send(outcome.clone());
        }
    }
}

struct Inner<G> {
    gateway: G,
    streams: StreamClient,
    config: EngineConfig,
    state: Mutex<UserDataState>,
    observers: Mutex<Observers>,
    channel: Mutex<ChannelSlot>,
    next_observer_id: AtomicU64,
    initialized: AtomicBool,
    session_valid: AtomicBool,
    destroyed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes exactly the observer it was returned for
#[must_use = "dropping the handle keeps the observer registered"]
pub struct Unsubscribe {
    target: Weak<dyn ObserverRegistry>,
    kind: ObserverKind,
    id: u64,
}

impl Unsubscribe {
    /// True if the observer was still registered
    pub fn unsubscribe(self) -> bool {
        match self.target.upgrade() {
            Some(registry) => registry.remove_observer(self.kind, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

trait ObserverRegistry {
    fn remove_observer(&self, kind: ObserverKind, id: u64) -> bool;
}

impl<G> ObserverRegistry for Inner<G> {
    fn remove_observer(&self, kind: ObserverKind, id: u64) -> bool {
        lock(&self.observers).remove(kind, id)
    }
}

/// Authoritative local view of one account's open orders and positions
pub struct UserDataEngine<G: AccountGateway + 'static> {
    inner: Arc<Inner<G>>,
}

impl<G: AccountGateway + 'static> UserDataEngine<G> {
    pub fn new(gateway: G, streams: StreamClient, config: EngineConfig) -> Self {
        let state = UserDataState::new(config.position_mode);
        Self {
            inner: Arc::new(Inner {
                gateway,
                streams,
                config,
                state: Mutex::new(state),
                observers: Mutex::new(Observers::default()),
                channel: Mutex::new(ChannelSlot::default()),
                next_observer_id: AtomicU64::new(1),
                initialized: AtomicBool::new(false),
                session_valid: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Open (or reuse) the user channel and load both snapshots.
    ///
    /// The three run concurrently. If any fails the error names it and the
    /// current state is left untouched.
    pub async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return Err(ExchangeError::ConfigurationError("engine destroyed".to_string()));
        }
        let _timer = PerfTimer::start("user_data_init");

        let (channel, orders, positions) = monoio::join!(
            Inner::ensure_user_channel(inner),
            inner.gateway.get_open_orders(),
            inner.gateway.get_open_positions()
        );
        channel.map_err(|e| ExchangeError::snapshot(SnapshotPart::UserChannel, e))?;
        let orders = orders.map_err(|e| ExchangeError::snapshot(SnapshotPart::Orders, e))?;
        let positions = positions.map_err(|e| ExchangeError::snapshot(SnapshotPart::Positions, e))?;

        let (order_count, position_count) = (orders.len(), positions.len());
        inner.replace_orders(orders);
        inner.replace_positions(positions);

        inner.session_valid.store(true, Ordering::SeqCst);
        inner.initialized.store(true, Ordering::SeqCst);
        Inner::start_keepalive(inner);

        info!(
            "✅ User data initialized: {} open orders, {} positions",
            order_count, position_count
        );
        Ok(())
    }

    /// Re-pull open orders; on failure state is unchanged
    pub async fn request_all_orders(&self) -> Result<()> {
        let orders = self
            .inner
            .gateway
            .get_open_orders()
            .await
            .map_err(|e| ExchangeError::snapshot(SnapshotPart::Orders, e))?;
        self.inner.replace_orders(orders);
        Ok(())
    }

    /// Re-pull positions; on failure state is unchanged
    pub async fn request_all_positions(&self) -> Result<()> {
        let positions = self
            .inner
            .gateway
            .get_open_positions()
            .await
            .map_err(|e| ExchangeError::snapshot(SnapshotPart::Positions, e))?;
        self.inner.replace_positions(positions);
        Ok(())
    }

    /// Both snapshots; each applies independently of the other's outcome
    pub async fn resync(&self) -> Result<()> {
        Inner::resync(&self.inner).await
    }

    /// Apply one user event. Session expiry is returned as an error.
    pub fn apply(&self, event: UserEvent) -> Result<()> {
        self.inner.apply(event)
    }

    pub fn on_order_update<F>(&self, observer: F) -> Unsubscribe
    where
        F: Fn(&str, &[CanonicalOrder]) + 'static,
    {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).orders.insert(id, Arc::new(observer));
        self.unsubscribe_handle(ObserverKind::Order, id)
    }

    /// Observers get every record for the symbol; empty when none
    pub fn on_position_update<F>(&self, observer: F) -> Unsubscribe
    where
        F: Fn(&str, &[CanonicalPosition]) + 'static,
    {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).positions.insert(id, Arc::new(observer));
        self.unsubscribe_handle(ObserverKind::Position, id)
    }

    /// Session invalidation (expired listen key, rejected auth)
    pub fn on_session_error<F>(&self, observer: F) -> Unsubscribe
    where
        F: Fn(&ExchangeError) + 'static,
    {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).session_errors.insert(id, Arc::new(observer));
        self.unsubscribe_handle(ObserverKind::SessionError, id)
    }

    /// Called after the user channel comes back from a reconnect
    pub fn on_reconnect<F>(&self, observer: F) -> Unsubscribe
    where
        F: Fn() + 'static,
    {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).reconnects.insert(id, Arc::new(observer));
        self.unsubscribe_handle(ObserverKind::Reconnect, id)
    }

    fn unsubscribe_handle(&self, kind: ObserverKind, id: u64) -> Unsubscribe {
        let target: Arc<dyn ObserverRegistry> = self.inner.clone();
        Unsubscribe {
            target: Arc::downgrade(&target),
            kind,
            id,
        }
    }

    /// Re-deliver the current open orders for `symbol` to every observer
    pub fn trigger_order_update(&self, symbol: &str) {
        self.inner.notify_orders(symbol);
    }

    pub fn trigger_position_update(&self, symbol: &str) {
        self.inner.notify_positions(symbol);
    }

    /// Disconnect the user channel and drop every observer. Idempotent.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.session_valid.store(false, Ordering::SeqCst);
        inner.teardown_channel();
        lock(&inner.observers).clear();
        info!("🧹 User data engine destroyed");
    }

    pub fn open_orders(&self) -> Vec<CanonicalOrder> {
        lock(&self.inner.state).open_orders()
    }

    pub fn open_orders_for(&self, symbol: &str) -> Vec<CanonicalOrder> {
        lock(&self.inner.state).orders_for(symbol)
    }

    /// Every tracked position record, flat ones included
    pub fn positions(&self) -> Vec<CanonicalPosition> {
        lock(&self.inner.state).positions()
    }

    pub fn open_positions(&self) -> Vec<CanonicalPosition> {
        lock(&self.inner.state).open_positions()
    }

    pub fn positions_for(&self, symbol: &str) -> Vec<CanonicalPosition> {
        lock(&self.inner.state).positions_for(symbol)
    }

    pub fn balances(&self) -> Vec<CanonicalBalance> {
        lock(&self.inner.state).balances()
    }

    /// Copy of the whole state
    pub fn snapshot(&self) -> UserDataState {
        lock(&self.inner.state).clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// False after session loss or destroy, until the next successful init
    pub fn is_session_valid(&self) -> bool {
        self.inner.session_valid.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &G {
        &self.inner.gateway
    }
}

impl<G: AccountGateway + 'static> Inner<G> {
    async fn ensure_user_channel(this: &Arc<Self>) -> Result<()> {
        let pending = {
            let mut slot = lock(&this.channel);
            if slot.handle.as_ref().is_some_and(|handle| !handle.is_closed()) {
                return Ok(());
            }
            if slot.opening {
                let (tx, rx) = flume::bounded(1);
                slot.waiters.push(tx);
                Some(rx)
            } else {
                slot.opening = true;
                None
            }
        };

        if let Some(rx) = pending {
            debug!("User channel open already in flight, waiting");
            return rx.recv_async().await.unwrap_or_else(|_| {
                Err(ExchangeError::ConnectionFailed("user channel open abandoned".to_string()))
            });
        }

        let mut guard = OpeningGuard {
            slot: &this.channel,
            outcome: None,
        };
        let outcome = Inner::open_user_channel(this).await;
        guard.outcome = Some(outcome.clone());
        outcome
    }

    async fn open_user_channel(this: &Arc<Self>) -> Result<()> {
        let spec = this.gateway.user_channel_spec().await?;
        let on_event = {
            let weak = Arc::downgrade(this);
            move |event: CanonicalEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_stream_event(event);
                }
            }
        };
        let on_status = {
            let weak = Arc::downgrade(this);
            move |status: ConnectionStatus| {
                if let Some(inner) = weak.upgrade() {
                    Inner::on_status(&inner, status);
                }
            }
        };

        let handle = this.streams.subscribe(spec, on_event, on_status).await?;
        if this.destroyed.load(Ordering::SeqCst) {
            handle.disconnect();
            return Err(ExchangeError::ConfigurationError("engine destroyed".to_string()));
        }
        info!("🔐 User channel {} subscribed", handle.id());
        let stale = {
            let mut slot = lock(&this.channel);
            slot.reconnecting = false;
            slot.handle.replace(handle)
        };
        if let Some(stale) = stale {
            stale.disconnect();
        }
        Ok(())
    }

    fn on_stream_event(&self, event: CanonicalEvent) {
        match event {
            CanonicalEvent::User(user) => {
                if let Err(e) = self.apply(user) {
                    error!("❌ User channel error: {}", e);
                }
            }
            other => debug!("Ignoring market event on user channel: {:?}", other),
        }
    }

    fn on_status(this: &Arc<Self>, status: ConnectionStatus) {
        let reconnected = {
            let mut slot = lock(&this.channel);
            match status {
                ConnectionStatus::Reconnecting => {
                    slot.reconnecting = true;
                    false
                }
                ConnectionStatus::Open => std::mem::take(&mut slot.reconnecting),
                _ => false,
            }
        };

        match status {
            ConnectionStatus::Reconnecting => {
                warn!("⚠️  User channel reconnecting, events may be missed until resync");
            }
            ConnectionStatus::Closed if this.session_valid.load(Ordering::SeqCst) => {
                warn!("⚠️  User channel closed while session valid");
            }
            _ => debug!("User channel status: {:?}", status),
        }

        if !reconnected || this.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let observers: Vec<_> = lock(&this.observers).reconnects.values().cloned().collect();
        for observer in observers {
            observer();
        }

        if this.config.resync_on_reconnect {
            info!("🔄 Resyncing snapshots after reconnect");
            let weak = Arc::downgrade(this);
            monoio::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    if let Err(e) = Inner::resync(&inner).await {
                        warn!("⚠️  Resync after reconnect failed: {}", e);
                    }
                }
            });
        }
    }

    async fn resync(this: &Arc<Self>) -> Result<()> {
        let (orders, positions) = monoio::join!(this.gateway.get_open_orders(), this.gateway.get_open_positions());
        let orders = orders
            .map(|orders| this.replace_orders(orders))
            .map_err(|e| ExchangeError::snapshot(SnapshotPart::Orders, e));
        let positions = positions
            .map(|positions| this.replace_positions(positions))
            .map_err(|e| ExchangeError::snapshot(SnapshotPart::Positions, e));
        orders.and(positions)
    }

    fn apply(&self, event: UserEvent) -> Result<()> {
        match event {
            UserEvent::Orders(orders) => {
                let mut touched = Vec::new();
                {
                    let mut state = lock(&self.state);
                    for order in orders {
                        let symbol = order.symbol.clone();
                        let change = state.apply_order(order);
                        if change == OrderChange::Unchanged {
                            debug!("📋 {} order event left open set unchanged", symbol);
                        }
                        push_unique(&mut touched, symbol);
                    }
                }
                for symbol in &touched {
                    self.notify_orders(symbol);
                }
                Ok(())
            }
            UserEvent::Account { positions, balances } => {
                let mut touched = Vec::new();
                {
                    let mut state = lock(&self.state);
                    for position in positions {
                        push_unique(&mut touched, position.symbol.clone());
                        state.apply_position(position);
                    }
                    for balance in balances {
                        state.apply_balance(balance);
                    }
                }
                for symbol in &touched {
                    self.notify_positions(symbol);
                }
                Ok(())
            }
            UserEvent::SessionExpired { reason } => {
                let err = ExchangeError::SessionExpired(reason);
                self.session_lost(&err);
                Err(err)
            }
        }
    }

    /// Everything later on the channel is meaningless; tear it down and tell the owner
    fn session_lost(&self, err: &ExchangeError) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        self.session_valid.store(false, Ordering::SeqCst);
        error!("🔒 User session lost: {}", err);
        self.teardown_channel();

        let observers: Vec<_> = lock(&self.observers).session_errors.values().cloned().collect();
        for observer in observers {
            observer(err);
        }
    }

    fn teardown_channel(&self) {
        let (handle, keepalive_stop) = {
            let mut slot = lock(&self.channel);
            slot.reconnecting = false;
            (slot.handle.take(), slot.keepalive_stop.take())
        };
        if let Some(handle) = handle {
            handle.disconnect();
        }
        if let Some(stop) = keepalive_stop {
            let _ = stop.try_send(());
        }
    }

    fn replace_orders(&self, orders: Vec<CanonicalOrder>) {
        let touched = lock(&self.state).replace_orders(orders);
        for symbol in &touched {
            self.notify_orders(symbol);
        }
    }

    fn replace_positions(&self, positions: Vec<CanonicalPosition>) {
        let touched = lock(&self.state).replace_positions(positions);
        for symbol in &touched {
            self.notify_positions(symbol);
        }
    }

    fn notify_orders(&self, symbol: &str) {
        let view = lock(&self.state).orders_for(symbol);
        let observers: Vec<_> = lock(&self.observers).orders.values().cloned().collect();
        for observer in observers {
            observer(symbol, &view);
        }
    }

    fn notify_positions(&self, symbol: &str) {
        let view = lock(&self.state).positions_for(symbol);
        let observers: Vec<_> = lock(&self.observers).positions.values().cloned().collect();
        for observer in observers {
            observer(symbol, &view);
        }
    }

    /// Periodic session refresh for providers that need one
    fn start_keepalive(this: &Arc<Self>) {
        let Some(interval) = this.gateway.keepalive_interval() else {
            return;
        };
        let mut slot = lock(&this.channel);
        if slot.keepalive_stop.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = flume::bounded(1);
        slot.keepalive_stop = Some(stop_tx);
        drop(slot);

        let weak = Arc::downgrade(this);
        monoio::spawn(keepalive_loop(weak, interval, stop_rx));
        debug!("💓 Session keepalive every {:?}", interval);
    }
}

async fn keepalive_loop<G: AccountGateway + 'static>(
    weak: Weak<Inner<G>>,
    interval: Duration,
    stop_rx: flume::Receiver<()>,
) {
    loop {
        let stopped = monoio::select! {
            _ = monoio::time::sleep(interval) => false,
            _ = stop_rx.recv_async() => true,
        };
        if stopped {
            break;
        }
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match inner.gateway.keepalive().await {
            Ok(()) => debug!("💓 Session keepalive ok"),
            Err(e) => warn!("⚠️  Session keepalive failed: {}", e),
        }
    }
    debug!("Session keepalive stopped");
}

fn push_unique(symbols: &mut Vec<String>, symbol: String) {
    if !symbols.contains(&symbol) {
        symbols.push(symbol);
    }
}
