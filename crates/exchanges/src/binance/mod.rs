//! Binance USDⓈ-M futures adapter
//!
//! Stream channel specs and parsers, wire-to-canonical converters, and the
//! signed REST client that feeds user-data snapshots.

pub mod config;
pub mod converters;
pub mod rest;
pub mod streams;

pub use config::BinanceConfig;
pub use rest::BinanceFuturesRest;
pub use streams::{book_ticker_topic, depth_topic, kline_topic, public_channel, trade_topic, user_channel};
