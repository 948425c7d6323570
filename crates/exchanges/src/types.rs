//! Canonical data model
//!
//! Every venue adapter converges on these types. Prices and quantities are
//! [`Fixed`] decimals, timestamps are epoch milliseconds.

use omnisync_core::prelude::*;
use std::fmt;

/// Supported venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// Binance USDⓈ-M futures
    BinanceFutures,
    /// Bybit v5 linear contracts
    Bybit,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::BinanceFutures => write!(f, "binance-futures"),
            Venue::Bybit => write!(f, "bybit"),
        }
    }
}

/// Logical stream channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Kline,
    Depth,
    Trade,
    BookTicker,
    UserData,
}

impl ChannelKind {
    pub fn is_private(&self) -> bool {
        matches!(self, ChannelKind::UserData)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Kline => write!(f, "kline"),
            ChannelKind::Depth => write!(f, "depth"),
            ChannelKind::Trade => write!(f, "trade"),
            ChannelKind::BookTicker => write!(f, "bookTicker"),
            ChannelKind::UserData => write!(f, "userData"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopMarket => write!(f, "STOP_MARKET"),
            OrderType::TakeProfit => write!(f, "TAKE_PROFIT"),
            OrderType::TakeProfitMarket => write!(f, "TAKE_PROFIT_MARKET"),
            OrderType::TrailingStopMarket => write!(f, "TRAILING_STOP_MARKET"),
        }
    }
}

/// Canonical order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    Pending,
    Triggered,
    Finished,
}

impl OrderStatus {
    /// No further fills or transitions follow a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::Finished
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Canceled => write!(f, "CANCELED"),
            OrderStatus::PendingCancel => write!(f, "PENDING_CANCEL"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
            OrderStatus::Expired => write!(f, "EXPIRED"),
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Triggered => write!(f, "TRIGGERED"),
            OrderStatus::Finished => write!(f, "FINISHED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    GoodTillCanceled,
    ImmediateOrCancel,
    FillOrKill,
    /// Post-only (Binance GTX, Bybit PostOnly)
    PostOnly,
    GoodTillDate,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::GoodTillCanceled => write!(f, "GTC"),
            TimeInForce::ImmediateOrCancel => write!(f, "IOC"),
            TimeInForce::FillOrKill => write!(f, "FOK"),
            TimeInForce::PostOnly => write!(f, "GTX"),
            TimeInForce::GoodTillDate => write!(f, "GTD"),
        }
    }
}

/// Price reference used to evaluate a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkingType {
    ContractPrice,
    MarkPrice,
}

impl fmt::Display for WorkingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkingType::ContractPrice => write!(f, "CONTRACT_PRICE"),
            WorkingType::MarkPrice => write!(f, "MARK_PRICE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Both => write!(f, "BOTH"),
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Account position mode, configured per venue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionMode {
    /// One net position per symbol
    #[default]
    OneWay,
    /// Long and short positions may coexist per symbol
    Hedge,
}

/// Venue-agnostic order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub symbol: String,
    pub client_order_id: String,
    /// Venue-assigned order id
    pub order_id: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub original_quantity: Fixed,
    pub original_price: Fixed,
    pub average_price: Fixed,
    pub stop_price: Fixed,
    pub status: OrderStatus,
    pub executed_quantity: Fixed,
    pub last_filled_quantity: Fixed,
    pub last_filled_price: Fixed,
    pub reduce_only: bool,
    pub close_all: bool,
    pub working_type: WorkingType,
    pub position_side: PositionSide,
    pub is_algo_order: bool,
    pub update_time: u64,
}

impl CanonicalOrder {
    pub fn key(&self) -> OrderKey {
        OrderKey {
            symbol: self.symbol.clone(),
            client_order_id: self.client_order_id.clone(),
        }
    }
}

/// Order identity: (symbol, clientOrderId)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    pub symbol: String,
    pub client_order_id: String,
}

/// Venue-agnostic position record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPosition {
    pub symbol: String,
    pub position_side: PositionSide,
    /// Signed size; negative is short in one-way mode
    pub position_amount: Fixed,
    pub entry_price: Fixed,
    pub unrealized_pnl: Fixed,
    pub update_time: u64,
}

impl CanonicalPosition {
    pub fn is_in_position(&self) -> bool {
        !self.position_amount.is_zero()
    }

    pub fn key(&self, mode: PositionMode) -> PositionKey {
        PositionKey {
            symbol: self.symbol.clone(),
            side: match mode {
                PositionMode::OneWay => None,
                PositionMode::Hedge => Some(self.position_side),
            },
        }
    }
}

/// Position identity: (symbol) one-way, (symbol, side) hedge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub symbol: String,
    pub side: Option<PositionSide>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBalance {
    pub asset: String,
    pub wallet_balance: Fixed,
    pub available_balance: Fixed,
    pub update_time: u64,
}

/// Price level (price, quantity)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Fixed,
    pub quantity: Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub interval: String,
    pub open_time: u64,
    pub close_time: u64,
    pub open: Fixed,
    pub high: Fixed,
    pub low: Fixed,
    pub close: Fixed,
    pub volume: Fixed,
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depth {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub update_id: u64,
    /// Full book image rather than an incremental delta
    pub is_snapshot: bool,
    pub event_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub trade_id: String,
    pub price: Fixed,
    pub quantity: Fixed,
    /// Aggressor side
    pub taker_side: OrderSide,
    pub trade_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookTicker {
    pub symbol: String,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    pub update_id: u64,
    pub event_time: u64,
}

/// Private account events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserEvent {
    Orders(Vec<CanonicalOrder>),
    Account {
        positions: Vec<CanonicalPosition>,
        balances: Vec<CanonicalBalance>,
    },
    /// The private session is no longer valid (expired listen key, failed auth)
    SessionExpired { reason: String },
}

/// Output of the message normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CanonicalEvent {
    Kline(Kline),
    Depth(Depth),
    Trades(Vec<Trade>),
    BookTicker(BookTicker),
    User(UserEvent),
}

/// Transport state as seen by a subscription's status observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "CONNECTING"),
            ConnectionStatus::Open => write!(f, "OPEN"),
            ConnectionStatus::Reconnecting => write!(f, "RECONNECTING"),
            ConnectionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}
