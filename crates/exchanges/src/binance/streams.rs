//! Binance futures stream channels
//!
//! Public data comes through the combined-stream endpoint
//! (`{"stream": .., "data": {..}}`) and is subscribed with a `SUBSCRIBE`
//! frame after every connect. The private stream is addressed by listen
//! key in the URL and needs no handshake. The server pings; the transport
//! answers.

use super::config::BinanceConfig;
use super::converters::*;
use crate::errors::{ExchangeError, Result};
use crate::normalizer::{map_rows, opt_bool, opt_str, opt_u64, price_levels, req_fixed, req_str, req_u64, Control};
use crate::transport::{ChannelSpec, Heartbeat};
use crate::types::*;
use omnisync_core::next_sequence;

use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

pub fn kline_topic(symbol: &str, interval: &str) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval)
}

/// Partial book depth; `levels` is 5, 10 or 20
pub fn depth_topic(symbol: &str, levels: u32) -> String {
    format!("{}@depth{}@100ms", symbol.to_lowercase(), levels)
}

pub fn trade_topic(symbol: &str) -> String {
    format!("{}@aggTrade", symbol.to_lowercase())
}

pub fn book_ticker_topic(symbol: &str) -> String {
    format!("{}@bookTicker", symbol.to_lowercase())
}

/// Public market-data channel over the combined-stream endpoint
pub fn public_channel(config: &BinanceConfig, kind: ChannelKind, topics: Vec<String>) -> Result<ChannelSpec> {
    if kind.is_private() {
        return Err(ExchangeError::ConfigurationError(
            "user data is not a public Binance channel".to_string(),
        ));
    }
    Ok(ChannelSpec {
        venue: Venue::BinanceFutures,
        kind,
        url: Url::parse(&config.ws_public_url)?,
        topics,
        credentials: None,
        heartbeat: Heartbeat::ServerPing,
    })
}

/// Private user-data channel for a listen key
pub fn user_channel(config: &BinanceConfig, listen_key: &str) -> Result<ChannelSpec> {
    let url = Url::parse(&format!(
        "{}/{}",
        config.ws_private_url.trim_end_matches('/'),
        listen_key
    ))?;
    Ok(ChannelSpec {
        venue: Venue::BinanceFutures,
        kind: ChannelKind::UserData,
        url,
        topics: Vec::new(),
        credentials: None,
        heartbeat: Heartbeat::ServerPing,
    })
}

pub fn subscribe_frame(topics: &[String]) -> String {
    json!({
        "method": "SUBSCRIBE",
        "params": topics,
        "id": next_sequence(),
    })
    .to_string()
}

pub fn handshake_frames(spec: &ChannelSpec) -> Result<Vec<String>> {
    if spec.topics.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![subscribe_frame(&spec.topics)])
}

/// `{"result": null, "id": n}` acks and `{"error": .., "id": n}` replies
pub fn classify_control(v: &Value) -> Control {
    let is_reply = v.get("id").is_some() && (v.get("result").is_some() || v.get("error").is_some());
    if !is_reply {
        return Control::Data;
    }
    if let Some(error) = v.get("error") {
        warn!("⚠️  Binance rejected request {}: {}", v["id"], error);
    } else {
        debug!("📨 Binance ack for request {}", v["id"]);
    }
    Control::Ignore
}

/// Strip the combined-stream envelope when present
fn payload(v: &Value) -> &Value {
    match (v.get("stream"), v.get("data")) {
        (Some(_), Some(data)) => data,
        _ => v,
    }
}

/// Checks the event type; `Ok(false)` for a well-formed event of another type
fn expect_event(data: &Value, expected: &str) -> Result<bool> {
    let event = req_str(data, "e")?;
    if event != expected {
        debug!("Ignoring Binance '{}' event on {} channel", event, expected);
        return Ok(false);
    }
    Ok(true)
}

pub fn parse_kline(v: &Value) -> Result<Option<CanonicalEvent>> {
    let data = payload(v);
    if !expect_event(data, "kline")? {
        return Ok(None);
    }
    let k = &data["k"];
    if !k.is_object() {
        return Err(ExchangeError::malformed("kline event without 'k'"));
    }

    Ok(Some(CanonicalEvent::Kline(Kline {
        symbol: req_str(data, "s")?.to_string(),
        interval: req_str(k, "i")?.to_string(),
        open_time: req_u64(k, "t")?,
        close_time: req_u64(k, "T")?,
        open: req_fixed(k, "o")?,
        high: req_fixed(k, "h")?,
        low: req_fixed(k, "l")?,
        close: req_fixed(k, "c")?,
        volume: req_fixed(k, "v")?,
        is_closed: opt_bool(k, "x"),
    })))
}

pub fn parse_depth(v: &Value) -> Result<Option<CanonicalEvent>> {
    let data = payload(v);
    if !expect_event(data, "depthUpdate")? {
        return Ok(None);
    }

    Ok(Some(CanonicalEvent::Depth(Depth {
        symbol: req_str(data, "s")?.to_string(),
        bids: price_levels(data, "b")?,
        asks: price_levels(data, "a")?,
        update_id: req_u64(data, "u")?,
        // Partial book streams always carry the top N levels
        is_snapshot: true,
        event_time: opt_u64(data, "E"),
    })))
}

pub fn parse_trade(v: &Value) -> Result<Option<CanonicalEvent>> {
    let data = payload(v);
    if !expect_event(data, "aggTrade")? {
        return Ok(None);
    }

    // m = buyer is maker, so the aggressor sold
    let taker_side = if opt_bool(data, "m") { OrderSide::Sell } else { OrderSide::Buy };
    Ok(Some(CanonicalEvent::Trades(vec![Trade {
        symbol: req_str(data, "s")?.to_string(),
        trade_id: req_u64(data, "a")?.to_string(),
        price: req_fixed(data, "p")?,
        quantity: req_fixed(data, "q")?,
        taker_side,
        trade_time: req_u64(data, "T")?,
    }])))
}

pub fn parse_book_ticker(v: &Value) -> Result<Option<CanonicalEvent>> {
    let data = payload(v);
    if !expect_event(data, "bookTicker")? {
        return Ok(None);
    }

    Ok(Some(CanonicalEvent::BookTicker(BookTicker {
        symbol: req_str(data, "s")?.to_string(),
        best_bid: Some(PriceLevel {
            price: req_fixed(data, "b")?,
            quantity: req_fixed(data, "B")?,
        }),
        best_ask: Some(PriceLevel {
            price: req_fixed(data, "a")?,
            quantity: req_fixed(data, "A")?,
        }),
        update_id: opt_u64(data, "u"),
        event_time: opt_u64(data, "E"),
    })))
}

pub fn parse_user_data(v: &Value) -> Result<Option<CanonicalEvent>> {
    let data = payload(v);
    let event_time = opt_u64(data, "E");

    let event = match req_str(data, "e")? {
        "ORDER_TRADE_UPDATE" => {
            UserEvent::Orders(vec![order_from_update(&data["o"], event_time)?])
        }
        "ALGO_UPDATE" => UserEvent::Orders(vec![order_from_algo_update(&data["o"], event_time)?]),
        "ACCOUNT_UPDATE" => {
            let account = &data["a"];
            let positions = map_rows(&account["P"], |p| position_from_account(p, event_time))?;
            let balances = map_rows(&account["B"], |b| balance_from_account(b, event_time))?;
            debug!("📊 ACCOUNT_UPDATE ({}): {} positions, {} balances", opt_str(account, "m"), positions.len(), balances.len());
            UserEvent::Account { positions, balances }
        }
        "listenKeyExpired" => UserEvent::SessionExpired {
            reason: "listenKeyExpired".to_string(),
        },
        other => {
            debug!("Ignoring Binance user event '{}'", other);
            return Ok(None);
        }
    };

    Ok(Some(CanonicalEvent::User(event)))
}
