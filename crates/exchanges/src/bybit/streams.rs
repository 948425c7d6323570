//! Bybit v5 stream channels
//!
//! Every frame is `{"topic": .., "data": ..}`. Private connections sign an
//! auth frame with a short expiry, so the handshake is rebuilt per connect.
//! Bybit drops idle sockets; the client pings with `{"op":"ping"}`.

use super::config::BybitConfig;
use super::converters::{balances_from_wallet, order_from_row, position_from_row};
use crate::auth::Credentials;
use crate::errors::{ExchangeError, Result};
use crate::normalizer::{map_rows, opt_str, opt_u64, price_levels, req_fixed, req_str, req_u64, Control};
use crate::transport::{ChannelSpec, Heartbeat};
use crate::types::*;
use omnisync_core::millis;

use serde_json::{json, Value};
use tracing::{debug, error, warn};
use url::Url;

/// Bybit caps a single subscribe request at 10 topics
const MAX_TOPICS_PER_FRAME: usize = 10;
const AUTH_EXPIRY_MS: u64 = 10_000;

pub const PRIVATE_TOPICS: [&str; 3] = ["order", "position", "wallet"];

pub fn kline_topic(symbol: &str, interval: &str) -> String {
    format!("kline.{}.{}", interval, symbol.to_uppercase())
}

/// `depth` is 1, 50, 200 or 500
pub fn depth_topic(symbol: &str, depth: u32) -> String {
    format!("orderbook.{}.{}", depth, symbol.to_uppercase())
}

pub fn trade_topic(symbol: &str) -> String {
    format!("publicTrade.{}", symbol.to_uppercase())
}

/// Level-1 book doubles as the book ticker
pub fn book_ticker_topic(symbol: &str) -> String {
    depth_topic(symbol, 1)
}

pub fn ping_frame() -> String {
    json!({"op": "ping"}).to_string()
}

pub fn public_channel(config: &BybitConfig, kind: ChannelKind, topics: Vec<String>) -> Result<ChannelSpec> {
    if kind.is_private() {
        return Err(ExchangeError::ConfigurationError(
            "user data is not a public Bybit channel".to_string(),
        ));
    }
    Ok(ChannelSpec {
        venue: Venue::Bybit,
        kind,
        url: Url::parse(&config.ws_public_url)?,
        topics,
        credentials: None,
        heartbeat: Heartbeat::ClientPing { payload: ping_frame() },
    })
}

/// Private channel carrying order, position and wallet topics
pub fn user_channel(config: &BybitConfig) -> Result<ChannelSpec> {
    Ok(ChannelSpec {
        venue: Venue::Bybit,
        kind: ChannelKind::UserData,
        url: Url::parse(&config.ws_private_url)?,
        topics: PRIVATE_TOPICS.iter().map(|t| t.to_string()).collect(),
        credentials: Some(config.credentials()?),
        heartbeat: Heartbeat::ClientPing { payload: ping_frame() },
    })
}

/// Signature over `GET/realtime{expires}`
pub fn auth_frame(credentials: &Credentials, expires: u64) -> Result<String> {
    let signature = credentials.sign(&format!("GET/realtime{expires}"))?;
    Ok(json!({
        "op": "auth",
        "args": [credentials.api_key, expires, signature],
    })
    .to_string())
}

pub fn subscribe_frames(topics: &[String]) -> Vec<String> {
    topics
        .chunks(MAX_TOPICS_PER_FRAME)
        .map(|chunk| json!({"op": "subscribe", "args": chunk}).to_string())
        .collect()
}

pub fn handshake_frames(spec: &ChannelSpec) -> Result<Vec<String>> {
    let mut frames = Vec::new();
    if let Some(credentials) = &spec.credentials {
        frames.push(auth_frame(credentials, millis() + AUTH_EXPIRY_MS)?);
    }
    frames.extend(subscribe_frames(&spec.topics));
    Ok(frames)
}

/// Every `op` reply is control; a rejected auth ends the session
pub fn classify_control(v: &Value) -> Control {
    let Some(op) = v.get("op").and_then(Value::as_str) else {
        return Control::Data;
    };
    let success = v["success"].as_bool().unwrap_or(true);
    match op {
        "auth" if !success => {
            let reason = format!("auth rejected: {}", opt_str(v, "ret_msg"));
            error!("🔒 Bybit {}", reason);
            Control::SessionLost(reason)
        }
        _ if !success => {
            warn!("⚠️  Bybit '{}' failed: {}", op, opt_str(v, "ret_msg"));
            Control::Ignore
        }
        _ => {
            debug!("📨 Bybit '{}' ack", op);
            Control::Ignore
        }
    }
}

/// Topic root (`orderbook` of `orderbook.50.BTCUSDT`) and the data field
fn topic_data<'a>(v: &'a Value, expected: &str) -> Result<Option<&'a Value>> {
    let topic = req_str(v, "topic")?;
    let root = topic.split('.').next().unwrap_or(topic);
    if root != expected {
        debug!("Ignoring Bybit topic '{}' on {} channel", topic, expected);
        return Ok(None);
    }
    let data = &v["data"];
    if data.is_null() {
        return Err(ExchangeError::malformed(format!("{topic} without data")));
    }
    Ok(Some(data))
}

pub fn parse_kline(v: &Value) -> Result<Option<CanonicalEvent>> {
    let Some(data) = topic_data(v, "kline")? else {
        return Ok(None);
    };
    let topic = req_str(v, "topic")?;
    let symbol = topic.rsplit('.').next().unwrap_or_default().to_string();
    let k = data
        .as_array()
        .and_then(|rows| rows.last())
        .ok_or_else(|| ExchangeError::malformed("kline frame with empty data"))?;

    Ok(Some(CanonicalEvent::Kline(Kline {
        symbol,
        interval: req_str(k, "interval")?.to_string(),
        open_time: req_u64(k, "start")?,
        close_time: req_u64(k, "end")?,
        open: req_fixed(k, "open")?,
        high: req_fixed(k, "high")?,
        low: req_fixed(k, "low")?,
        close: req_fixed(k, "close")?,
        volume: req_fixed(k, "volume")?,
        is_closed: k["confirm"].as_bool().unwrap_or(false),
    })))
}

pub fn parse_depth(v: &Value) -> Result<Option<CanonicalEvent>> {
    let Some(data) = topic_data(v, "orderbook")? else {
        return Ok(None);
    };

    Ok(Some(CanonicalEvent::Depth(Depth {
        symbol: req_str(data, "s")?.to_string(),
        bids: price_levels(data, "b")?,
        asks: price_levels(data, "a")?,
        update_id: req_u64(data, "u")?,
        is_snapshot: opt_str(v, "type") == "snapshot",
        event_time: opt_u64(v, "ts"),
    })))
}

pub fn parse_trade(v: &Value) -> Result<Option<CanonicalEvent>> {
    let Some(data) = topic_data(v, "publicTrade")? else {
        return Ok(None);
    };

    let trades = map_rows(data, |t| {
        Ok(Trade {
            symbol: req_str(t, "s")?.to_string(),
            trade_id: req_str(t, "i")?.to_string(),
            price: req_fixed(t, "p")?,
            quantity: req_fixed(t, "v")?,
            taker_side: super::converters::map_side(req_str(t, "S")?)?,
            trade_time: req_u64(t, "T")?,
        })
    })?;
    if trades.is_empty() {
        return Ok(None);
    }
    Ok(Some(CanonicalEvent::Trades(trades)))
}

pub fn parse_book_ticker(v: &Value) -> Result<Option<CanonicalEvent>> {
    let Some(data) = topic_data(v, "orderbook")? else {
        return Ok(None);
    };

    // A zero quantity on the level-1 book means the side emptied
    let top = |field: &str| -> Result<Option<PriceLevel>> {
        Ok(price_levels(data, field)?
            .into_iter()
            .next()
            .filter(|level| !level.quantity.is_zero()))
    };

    Ok(Some(CanonicalEvent::BookTicker(BookTicker {
        symbol: req_str(data, "s")?.to_string(),
        best_bid: top("b")?,
        best_ask: top("a")?,
        update_id: req_u64(data, "u")?,
        event_time: opt_u64(v, "ts"),
    })))
}

pub fn parse_user_data(v: &Value) -> Result<Option<CanonicalEvent>> {
    let topic = req_str(v, "topic")?;
    let root = topic.split('.').next().unwrap_or(topic);
    let data = &v["data"];

    let event = match root {
        "order" => UserEvent::Orders(map_rows(data, order_from_row)?),
        "position" => UserEvent::Account {
            positions: map_rows(data, position_from_row)?,
            balances: Vec::new(),
        },
        "wallet" => {
            let update_time = opt_u64(v, "creationTime");
            let mut balances = Vec::new();
            for account in map_rows(data, |a| balances_from_wallet(a, update_time))? {
                balances.extend(account);
            }
            UserEvent::Account {
                positions: Vec::new(),
                balances,
            }
        }
        other => {
            debug!("Ignoring Bybit private topic '{}'", other);
            return Ok(None);
        }
    };

    Ok(Some(CanonicalEvent::User(event)))
}
