//! # OmniSync Exchange Integrations
//!
//! One canonical order/position model over several venues, kept in sync
//! in real time.
//!
//! ## Architecture
//!
//! - **Transport manager** - one monoio WebSocket per subscription, fixed-delay reconnect, handshake replay
//! - **Message normalizer** - explicit `(venue, channel)` parser table into canonical events
//! - **Reconciliation engine** - REST snapshots plus stream events into one observable user-data state
//! - **Venue adapters** - Binance USDⓈ-M futures and Bybit v5 linear

pub mod auth;
pub mod binance;
pub mod bybit;
pub mod errors;
pub mod http;
pub mod normalizer;
pub mod sync;
pub mod traits;
pub mod transport;
pub mod types;
pub mod websocket;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// Re-export main types
pub use auth::Credentials;
pub use binance::{BinanceConfig, BinanceFuturesRest};
pub use bybit::{BybitConfig, BybitRest};
pub use errors::{ExchangeError, Result, SnapshotPart};
pub use http::MonoioHttpsClient;
pub use normalizer::Normalizer;
pub use sync::{EngineConfig, Unsubscribe, UserDataEngine, UserDataState};
pub use traits::{AccountGateway, SnapshotProvider, UserStreamProvider};
pub use transport::{ChannelSpec, Heartbeat, StreamClient, SubscriptionHandle, TransportConfig};
pub use types::*;
pub use websocket::MonoioWebSocket;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::binance::{BinanceConfig, BinanceFuturesRest};
    pub use crate::bybit::{BybitConfig, BybitRest};
    pub use crate::errors::{ExchangeError, Result, SnapshotPart};
    pub use crate::normalizer::Normalizer;
    pub use crate::sync::{EngineConfig, Unsubscribe, UserDataEngine};
    pub use crate::traits::{AccountGateway, SnapshotProvider, UserStreamProvider};
    pub use crate::transport::{ChannelSpec, Heartbeat, StreamClient, SubscriptionHandle, TransportConfig};
    pub use crate::types::*;
    pub use omnisync_core::prelude::*;
}
