//! Canonical user-data state and its mutation rules
//!
//! Pure data: no I/O and no observers. Every mutation reports the symbols
//! it touched so the engine knows whom to notify.

use crate::types::*;

use std::collections::{BTreeMap, BTreeSet};

/// What an order event did to the open set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderChange {
    Upserted,
    Removed,
    /// Terminal status for an untracked key, or an untracked market order
    Unchanged,
}

/// Open orders, positions and balances of one account session
#[derive(Debug, Clone, Default)]
pub struct UserDataState {
    mode: PositionMode,
    orders: BTreeMap<OrderKey, CanonicalOrder>,
    positions: BTreeMap<PositionKey, CanonicalPosition>,
    balances: BTreeMap<String, CanonicalBalance>,
}

/// Open orders are non-terminal and not market orders
fn is_tracked(order: &CanonicalOrder) -> bool {
    !order.status.is_terminal() && order.order_type != OrderType::Market
}

impl UserDataState {
    pub fn new(mode: PositionMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> PositionMode {
        self.mode
    }

    pub fn apply_order(&mut self, order: CanonicalOrder) -> OrderChange {
        let key = order.key();
        // A triggered stop reports MARKET under the same id, so both drop the key
        if order.status.is_terminal() || order.order_type == OrderType::Market {
            return match self.orders.remove(&key) {
                Some(_) => OrderChange::Removed,
                None => OrderChange::Unchanged,
            };
        }
        self.orders.insert(key, order);
        OrderChange::Upserted
    }

    /// Insert or fully replace by identity key
    pub fn apply_position(&mut self, position: CanonicalPosition) {
        self.positions.insert(position.key(self.mode), position);
    }

    pub fn apply_balance(&mut self, balance: CanonicalBalance) {
        self.balances.insert(balance.asset.clone(), balance);
    }

    /// Authoritative replacement; returns old and new symbols
    pub fn replace_orders(&mut self, orders: Vec<CanonicalOrder>) -> BTreeSet<String> {
        let mut touched: BTreeSet<String> = self.orders.keys().map(|k| k.symbol.clone()).collect();
        self.orders = orders
            .into_iter()
            .filter(is_tracked)
            .map(|order| (order.key(), order))
            .collect();
        touched.extend(self.orders.keys().map(|k| k.symbol.clone()));
        touched
    }

    /// Authoritative replacement; returns old and new symbols
    pub fn replace_positions(&mut self, positions: Vec<CanonicalPosition>) -> BTreeSet<String> {
        let mut touched: BTreeSet<String> = self.positions.keys().map(|k| k.symbol.clone()).collect();
        let mode = self.mode;
        self.positions = positions.into_iter().map(|p| (p.key(mode), p)).collect();
        touched.extend(self.positions.keys().map(|k| k.symbol.clone()));
        touched
    }

    pub fn order(&self, key: &OrderKey) -> Option<&CanonicalOrder> {
        self.orders.get(key)
    }

    pub fn position(&self, key: &PositionKey) -> Option<&CanonicalPosition> {
        self.positions.get(key)
    }

    pub fn orders_for(&self, symbol: &str) -> Vec<CanonicalOrder> {
        self.orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect()
    }

    /// One record in one-way mode, up to two (long, short) in hedge mode
    pub fn positions_for(&self, symbol: &str) -> Vec<CanonicalPosition> {
        self.positions
            .values()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn open_orders(&self) -> Vec<CanonicalOrder> {
        self.orders.values().cloned().collect()
    }

    /// Every tracked record, flat ones included
    pub fn positions(&self) -> Vec<CanonicalPosition> {
        self.positions.values().cloned().collect()
    }

    pub fn open_positions(&self) -> Vec<CanonicalPosition> {
        self.positions
            .values()
            .filter(|p| p.is_in_position())
            .cloned()
            .collect()
    }

    pub fn balances(&self) -> Vec<CanonicalBalance> {
        self.balances.values().cloned().collect()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}
