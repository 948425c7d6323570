//! Message normalizer
//!
//! Converts raw venue frames into [`CanonicalEvent`]s. The parser for a
//! channel is picked once, when the normalizer is built, from an explicit
//! `(venue, channel)` table. Each venue also classifies protocol control
//! frames (acks, pongs) so they never reach the canonical pipeline.

use crate::errors::{ExchangeError, Result};
use crate::types::{CanonicalEvent, ChannelKind, UserEvent, Venue};
use crate::{binance, bybit};

use serde_json::Value;
use std::fmt;

/// Per-channel parser over a decoded JSON frame
pub type ParseFn = fn(&Value) -> Result<Option<CanonicalEvent>>;

/// Classification of a frame before channel parsing
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Carries data for the channel parser
    Data,
    /// Protocol chatter; produce nothing
    Ignore,
    /// The venue told us the private session is gone
    SessionLost(String),
}

pub type ControlFn = fn(&Value) -> Control;

/// Parser table
pub fn parser_for(venue: Venue, kind: ChannelKind) -> ParseFn {
    match (venue, kind) {
        (Venue::BinanceFutures, ChannelKind::Kline) => binance::streams::parse_kline,
        (Venue::BinanceFutures, ChannelKind::Depth) => binance::streams::parse_depth,
        (Venue::BinanceFutures, ChannelKind::Trade) => binance::streams::parse_trade,
        (Venue::BinanceFutures, ChannelKind::BookTicker) => binance::streams::parse_book_ticker,
        (Venue::BinanceFutures, ChannelKind::UserData) => binance::streams::parse_user_data,
        (Venue::Bybit, ChannelKind::Kline) => bybit::streams::parse_kline,
        (Venue::Bybit, ChannelKind::Depth) => bybit::streams::parse_depth,
        (Venue::Bybit, ChannelKind::Trade) => bybit::streams::parse_trade,
        (Venue::Bybit, ChannelKind::BookTicker) => bybit::streams::parse_book_ticker,
        (Venue::Bybit, ChannelKind::UserData) => bybit::streams::parse_user_data,
    }
}

pub fn control_for(venue: Venue) -> ControlFn {
    match venue {
        Venue::BinanceFutures => binance::streams::classify_control,
        Venue::Bybit => bybit::streams::classify_control,
    }
}

/// Normalizer bound to one `(venue, channel)`
#[derive(Clone, Copy)]
pub struct Normalizer {
    venue: Venue,
    kind: ChannelKind,
    control: ControlFn,
    parse: ParseFn,
}

impl Normalizer {
    pub fn new(venue: Venue, kind: ChannelKind) -> Self {
        Self {
            venue,
            kind,
            control: control_for(venue),
            parse: parser_for(venue, kind),
        }
    }

    /// `Ok(None)` for control frames, `Err` for frames failing validation
    pub fn normalize(&self, raw: &str) -> Result<Option<CanonicalEvent>> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ExchangeError::MalformedMessage(format!("invalid JSON: {e}")))?;
        self.normalize_value(&value)
    }

    pub fn normalize_value(&self, value: &Value) -> Result<Option<CanonicalEvent>> {
        match (self.control)(value) {
            Control::Data => (self.parse)(value),
            Control::Ignore => Ok(None),
            Control::SessionLost(reason) => {
                Ok(Some(CanonicalEvent::User(UserEvent::SessionExpired { reason })))
            }
        }
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }
}

impl fmt::Display for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.venue, self.kind)
    }
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("venue", &self.venue)
            .field("kind", &self.kind)
            .finish()
    }
}

// Field extraction helpers shared by the venue parsers. Each names the
// missing or mistyped field in its error so dropped frames are diagnosable.

pub(crate) fn req_str<'a>(v: &'a Value, field: &str) -> Result<&'a str> {
    v[field]
        .as_str()
        .ok_or_else(|| ExchangeError::malformed(format!("missing string field '{field}'")))
}

pub(crate) fn opt_str<'a>(v: &'a Value, field: &str) -> &'a str {
    v[field].as_str().unwrap_or("")
}

pub(crate) fn req_u64(v: &Value, field: &str) -> Result<u64> {
    match &v[field] {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ExchangeError::malformed(format!("missing integer field '{field}'")))
}

pub(crate) fn opt_u64(v: &Value, field: &str) -> u64 {
    req_u64(v, field).unwrap_or(0)
}

pub(crate) fn opt_i64(v: &Value, field: &str) -> i64 {
    match &v[field] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .unwrap_or(0)
}

pub(crate) fn opt_bool(v: &Value, field: &str) -> bool {
    match &v[field] {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Required decimal string
pub(crate) fn req_fixed(v: &Value, field: &str) -> Result<omnisync_core::Fixed> {
    let raw = req_str(v, field)?;
    omnisync_core::Fixed::from_str_exact(raw)
        .map_err(|e| ExchangeError::malformed(format!("field '{field}': {e}")))
}

/// Decimal string that may be absent or empty
pub(crate) fn opt_fixed(v: &Value, field: &str) -> Result<omnisync_core::Fixed> {
    omnisync_core::Fixed::from_str_or_zero(opt_str(v, field))
        .map_err(|e| ExchangeError::malformed(format!("field '{field}': {e}")))
}

/// Convert every element of an optional array; absent means empty
pub(crate) fn map_rows<T>(rows: &Value, convert: impl Fn(&Value) -> Result<T>) -> Result<Vec<T>> {
    match rows.as_array() {
        Some(rows) => rows.iter().map(convert).collect(),
        None => Ok(Vec::new()),
    }
}

/// `[[price, qty], ...]` levels
pub(crate) fn price_levels(v: &Value, field: &str) -> Result<Vec<crate::types::PriceLevel>> {
    let levels = v[field]
        .as_array()
        .ok_or_else(|| ExchangeError::malformed(format!("missing array field '{field}'")))?;

    levels
        .iter()
        .map(|level| {
            let price = level[0].as_str().unwrap_or("");
            let quantity = level[1].as_str().unwrap_or("");
            Ok(crate::types::PriceLevel {
                price: omnisync_core::Fixed::from_str_exact(price)
                    .map_err(|e| ExchangeError::malformed(format!("{field} price: {e}")))?,
                quantity: omnisync_core::Fixed::from_str_exact(quantity)
                    .map_err(|e| ExchangeError::malformed(format!("{field} quantity: {e}")))?,
            })
        })
        .collect()
}
