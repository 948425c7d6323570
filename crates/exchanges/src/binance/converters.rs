//! Binance futures wire records to canonical types
//!
//! Stream records use single-letter keys; REST records use full names.
//! Both land in the same canonical structs.

use crate::errors::{ExchangeError, Result};
use crate::normalizer::{opt_bool, opt_fixed, opt_str, opt_u64, req_fixed, req_str};
use crate::types::*;

use serde_json::Value;

pub fn map_order_status(status: &str) -> Result<OrderStatus> {
    Ok(match status {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "PENDING_CANCEL" => OrderStatus::PendingCancel,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        // Algo order lifecycle
        "TRIGGERING" => OrderStatus::Pending,
        "TRIGGERED" => OrderStatus::Triggered,
        "FINISHED" => OrderStatus::Finished,
        other => {
            return Err(ExchangeError::malformed(format!("unknown Binance order status '{other}'")));
        }
    })
}

pub fn map_order_type(order_type: &str) -> Result<OrderType> {
    Ok(match order_type {
        "LIMIT" => OrderType::Limit,
        "MARKET" | "LIQUIDATION" => OrderType::Market,
        "STOP" => OrderType::Stop,
        "STOP_MARKET" => OrderType::StopMarket,
        "TAKE_PROFIT" => OrderType::TakeProfit,
        "TAKE_PROFIT_MARKET" => OrderType::TakeProfitMarket,
        "TRAILING_STOP_MARKET" => OrderType::TrailingStopMarket,
        other => {
            return Err(ExchangeError::malformed(format!("unknown Binance order type '{other}'")));
        }
    })
}

pub fn map_side(side: &str) -> Result<OrderSide> {
    match side {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(ExchangeError::malformed(format!("unknown Binance side '{other}'"))),
    }
}

pub fn map_time_in_force(tif: &str) -> TimeInForce {
    match tif {
        "IOC" => TimeInForce::ImmediateOrCancel,
        "FOK" => TimeInForce::FillOrKill,
        "GTX" => TimeInForce::PostOnly,
        "GTD" => TimeInForce::GoodTillDate,
        _ => TimeInForce::GoodTillCanceled,
    }
}

/// Anything other than MARK_PRICE triggers on the contract price
pub fn map_working_type(working_type: &str) -> WorkingType {
    match working_type {
        "MARK_PRICE" => WorkingType::MarkPrice,
        _ => WorkingType::ContractPrice,
    }
}

pub fn map_position_side(side: &str) -> Result<PositionSide> {
    match side {
        "" | "BOTH" => Ok(PositionSide::Both),
        "LONG" => Ok(PositionSide::Long),
        "SHORT" => Ok(PositionSide::Short),
        other => Err(ExchangeError::malformed(format!("unknown Binance position side '{other}'"))),
    }
}

/// `ORDER_TRADE_UPDATE.o`
pub fn order_from_update(o: &Value, event_time: u64) -> Result<CanonicalOrder> {
    Ok(CanonicalOrder {
        symbol: req_str(o, "s")?.to_string(),
        client_order_id: req_str(o, "c")?.to_string(),
        order_id: o["i"].as_u64().map(|id| id.to_string()).unwrap_or_default(),
        side: map_side(req_str(o, "S")?)?,
        order_type: map_order_type(req_str(o, "o")?)?,
        time_in_force: map_time_in_force(opt_str(o, "f")),
        original_quantity: req_fixed(o, "q")?,
        original_price: opt_fixed(o, "p")?,
        average_price: opt_fixed(o, "ap")?,
        stop_price: opt_fixed(o, "sp")?,
        status: map_order_status(req_str(o, "X")?)?,
        executed_quantity: opt_fixed(o, "z")?,
        last_filled_quantity: opt_fixed(o, "l")?,
        last_filled_price: opt_fixed(o, "L")?,
        reduce_only: opt_bool(o, "R"),
        close_all: opt_bool(o, "cp"),
        working_type: map_working_type(opt_str(o, "wt")),
        position_side: map_position_side(opt_str(o, "ps"))?,
        is_algo_order: false,
        update_time: match opt_u64(o, "T") {
            0 => event_time,
            t => t,
        },
    })
}

/// `ALGO_UPDATE.o` (conditional orders held by the algo service)
pub fn order_from_algo_update(o: &Value, event_time: u64) -> Result<CanonicalOrder> {
    Ok(CanonicalOrder {
        symbol: req_str(o, "s")?.to_string(),
        client_order_id: req_str(o, "caid")?.to_string(),
        order_id: o["aid"].as_u64().map(|id| id.to_string()).unwrap_or_default(),
        side: map_side(req_str(o, "S")?)?,
        order_type: map_order_type(req_str(o, "o")?)?,
        time_in_force: map_time_in_force(opt_str(o, "f")),
        original_quantity: opt_fixed(o, "q")?,
        original_price: opt_fixed(o, "p")?,
        average_price: opt_fixed(o, "ap")?,
        stop_price: opt_fixed(o, "tp")?,
        status: map_order_status(req_str(o, "X")?)?,
        executed_quantity: opt_fixed(o, "aq")?,
        last_filled_quantity: omnisync_core::Fixed::ZERO,
        last_filled_price: omnisync_core::Fixed::ZERO,
        reduce_only: opt_bool(o, "R"),
        close_all: opt_bool(o, "cp"),
        working_type: map_working_type(opt_str(o, "wt")),
        position_side: map_position_side(opt_str(o, "ps"))?,
        is_algo_order: true,
        update_time: event_time,
    })
}

/// `GET /fapi/v1/openOrders` row
pub fn order_from_rest(v: &Value) -> Result<CanonicalOrder> {
    Ok(CanonicalOrder {
        symbol: req_str(v, "symbol")?.to_string(),
        client_order_id: req_str(v, "clientOrderId")?.to_string(),
        order_id: v["orderId"].as_u64().map(|id| id.to_string()).unwrap_or_default(),
        side: map_side(req_str(v, "side")?)?,
        order_type: map_order_type(req_str(v, "type")?)?,
        time_in_force: map_time_in_force(opt_str(v, "timeInForce")),
        original_quantity: req_fixed(v, "origQty")?,
        original_price: opt_fixed(v, "price")?,
        average_price: opt_fixed(v, "avgPrice")?,
        stop_price: opt_fixed(v, "stopPrice")?,
        status: map_order_status(req_str(v, "status")?)?,
        executed_quantity: opt_fixed(v, "executedQty")?,
        last_filled_quantity: omnisync_core::Fixed::ZERO,
        last_filled_price: omnisync_core::Fixed::ZERO,
        reduce_only: opt_bool(v, "reduceOnly"),
        close_all: opt_bool(v, "closePosition"),
        working_type: map_working_type(opt_str(v, "workingType")),
        position_side: map_position_side(opt_str(v, "positionSide"))?,
        is_algo_order: false,
        update_time: opt_u64(v, "updateTime"),
    })
}

/// `ACCOUNT_UPDATE.a.P[]`
pub fn position_from_account(p: &Value, event_time: u64) -> Result<CanonicalPosition> {
    Ok(CanonicalPosition {
        symbol: req_str(p, "s")?.to_string(),
        position_side: map_position_side(opt_str(p, "ps"))?,
        position_amount: req_fixed(p, "pa")?,
        entry_price: opt_fixed(p, "ep")?,
        unrealized_pnl: opt_fixed(p, "up")?,
        update_time: event_time,
    })
}

/// `GET /fapi/v2/positionRisk` row
pub fn position_from_rest(v: &Value) -> Result<CanonicalPosition> {
    Ok(CanonicalPosition {
        symbol: req_str(v, "symbol")?.to_string(),
        position_side: map_position_side(opt_str(v, "positionSide"))?,
        position_amount: req_fixed(v, "positionAmt")?,
        entry_price: opt_fixed(v, "entryPrice")?,
        unrealized_pnl: opt_fixed(v, "unRealizedProfit")?,
        update_time: opt_u64(v, "updateTime"),
    })
}

/// `ACCOUNT_UPDATE.a.B[]`
pub fn balance_from_account(b: &Value, event_time: u64) -> Result<CanonicalBalance> {
    Ok(CanonicalBalance {
        asset: req_str(b, "a")?.to_string(),
        wallet_balance: req_fixed(b, "wb")?,
        available_balance: opt_fixed(b, "cw")?,
        update_time: event_time,
    })
}
