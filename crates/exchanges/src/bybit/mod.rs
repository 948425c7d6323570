//! Bybit v5 adapter for linear (USDT-settled) contracts

pub mod config;
pub mod converters;
pub mod rest;
pub mod streams;

pub use config::BybitConfig;
pub use rest::BybitRest;
pub use streams::{book_ticker_topic, depth_topic, kline_topic, public_channel, trade_topic, user_channel};
