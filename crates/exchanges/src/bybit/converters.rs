//! Bybit v5 records to canonical types
//!
//! Stream and REST rows share field names, so one converter serves both.

use crate::errors::{ExchangeError, Result};
use crate::normalizer::{opt_bool, opt_fixed, opt_i64, opt_str, opt_u64, req_fixed, req_str};
use crate::types::*;
use omnisync_core::Fixed;

use serde_json::Value;

/// Status after the cancel-vs-fill race check
pub fn map_order_status(status: &str, reject_reason: &str, cancel_type: &str) -> Result<OrderStatus> {
    Ok(match status {
        "Created" => OrderStatus::Pending,
        "New" | "Untriggered" | "Active" => OrderStatus::New,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Triggered" => OrderStatus::Triggered,
        "Filled" if lost_cancel_race(reject_reason, cancel_type) => OrderStatus::Canceled,
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "PartiallyFilledCanceled" => OrderStatus::Canceled,
        "Rejected" => OrderStatus::Rejected,
        "Deactivated" => OrderStatus::Expired,
        other => {
            return Err(ExchangeError::malformed(format!("unknown Bybit order status '{other}'")));
        }
    })
}

/// A cancel that raced a completed fill arrives as a second `Filled`
/// carrying both a reject reason and a cancel type.
fn lost_cancel_race(reject_reason: &str, cancel_type: &str) -> bool {
    let rejected = !matches!(reject_reason, "" | "EC_NoError");
    let cancelled = !matches!(cancel_type, "" | "UNKNOWN");
    rejected && cancelled
}

pub fn map_side(side: &str) -> Result<OrderSide> {
    match side {
        "Buy" => Ok(OrderSide::Buy),
        "Sell" => Ok(OrderSide::Sell),
        other => Err(ExchangeError::malformed(format!("unknown Bybit side '{other}'"))),
    }
}

pub fn map_time_in_force(tif: &str) -> TimeInForce {
    match tif {
        "IOC" => TimeInForce::ImmediateOrCancel,
        "FOK" => TimeInForce::FillOrKill,
        "PostOnly" => TimeInForce::PostOnly,
        _ => TimeInForce::GoodTillCanceled,
    }
}

/// `triggerBy`; only the mark price is distinguished
pub fn map_working_type(trigger_by: &str) -> WorkingType {
    match trigger_by {
        "MarkPrice" => WorkingType::MarkPrice,
        _ => WorkingType::ContractPrice,
    }
}

/// `positionIdx`: 0 one-way, 1 hedge buy side, 2 hedge sell side
pub fn map_position_idx(idx: i64) -> Result<PositionSide> {
    match idx {
        0 => Ok(PositionSide::Both),
        1 => Ok(PositionSide::Long),
        2 => Ok(PositionSide::Short),
        other => Err(ExchangeError::malformed(format!("unknown Bybit positionIdx {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerFamily {
    StopLoss,
    TakeProfit,
}

/// Canonical type from the leg type plus the conditional fields.
///
/// A SELL triggered by a falling price (or a BUY by a rising one) is a
/// stop; the converse is a take-profit. Without a direction the
/// `stopOrderType` name decides.
pub fn map_order_type(
    order_type: &str,
    stop_order_type: &str,
    side: OrderSide,
    trigger_direction: i64,
) -> Result<OrderType> {
    let is_market = match order_type {
        "Market" => true,
        "Limit" => false,
        other => {
            return Err(ExchangeError::malformed(format!("unknown Bybit order type '{other}'")));
        }
    };

    if stop_order_type.is_empty() || stop_order_type == "UNKNOWN" {
        return Ok(if is_market { OrderType::Market } else { OrderType::Limit });
    }
    if stop_order_type == "TrailingStop" {
        return Ok(OrderType::TrailingStopMarket);
    }

    let family = match (side, trigger_direction) {
        (OrderSide::Sell, 2) | (OrderSide::Buy, 1) => TriggerFamily::StopLoss,
        (OrderSide::Sell, 1) | (OrderSide::Buy, 2) => TriggerFamily::TakeProfit,
        _ if stop_order_type.contains("TakeProfit") => TriggerFamily::TakeProfit,
        _ => TriggerFamily::StopLoss,
    };

    Ok(match (family, is_market) {
        (TriggerFamily::StopLoss, true) => OrderType::StopMarket,
        (TriggerFamily::StopLoss, false) => OrderType::Stop,
        (TriggerFamily::TakeProfit, true) => OrderType::TakeProfitMarket,
        (TriggerFamily::TakeProfit, false) => OrderType::TakeProfit,
    })
}

/// `order` topic row or `/v5/order/realtime` row
pub fn order_from_row(o: &Value) -> Result<CanonicalOrder> {
    let side = map_side(req_str(o, "side")?)?;
    let order_id = req_str(o, "orderId")?.to_string();
    // Orders placed without a link id are keyed by the venue id
    let client_order_id = match opt_str(o, "orderLinkId") {
        "" => order_id.clone(),
        link => link.to_string(),
    };
    let stop_order_type = opt_str(o, "stopOrderType");

    Ok(CanonicalOrder {
        symbol: req_str(o, "symbol")?.to_string(),
        client_order_id,
        order_id,
        side,
        order_type: map_order_type(req_str(o, "orderType")?, stop_order_type, side, opt_i64(o, "triggerDirection"))?,
        time_in_force: map_time_in_force(opt_str(o, "timeInForce")),
        original_quantity: req_fixed(o, "qty")?,
        original_price: opt_fixed(o, "price")?,
        average_price: opt_fixed(o, "avgPrice")?,
        stop_price: opt_fixed(o, "triggerPrice")?,
        status: map_order_status(
            req_str(o, "orderStatus")?,
            opt_str(o, "rejectReason"),
            opt_str(o, "cancelType"),
        )?,
        executed_quantity: opt_fixed(o, "cumExecQty")?,
        last_filled_quantity: Fixed::ZERO,
        last_filled_price: Fixed::ZERO,
        reduce_only: opt_bool(o, "reduceOnly"),
        close_all: opt_bool(o, "closeOnTrigger"),
        working_type: map_working_type(opt_str(o, "triggerBy")),
        position_side: map_position_idx(opt_i64(o, "positionIdx"))?,
        is_algo_order: !stop_order_type.is_empty() && stop_order_type != "UNKNOWN",
        update_time: opt_u64(o, "updatedTime"),
    })
}

/// `position` topic row or `/v5/position/list` row; `Sell` sizes are negative
pub fn position_from_row(p: &Value) -> Result<CanonicalPosition> {
    let size = req_fixed(p, "size")?;
    let position_amount = match opt_str(p, "side") {
        "Sell" => -size,
        _ => size,
    };
    let entry_price = match opt_str(p, "entryPrice") {
        "" => opt_fixed(p, "avgPrice")?,
        _ => opt_fixed(p, "entryPrice")?,
    };

    Ok(CanonicalPosition {
        symbol: req_str(p, "symbol")?.to_string(),
        position_side: map_position_idx(opt_i64(p, "positionIdx"))?,
        position_amount,
        entry_price,
        unrealized_pnl: opt_fixed(p, "unrealisedPnl")?,
        update_time: opt_u64(p, "updatedTime"),
    })
}

/// `wallet` topic account row; one balance per coin
pub fn balances_from_wallet(account: &Value, update_time: u64) -> Result<Vec<CanonicalBalance>> {
    let Some(coins) = account["coin"].as_array() else {
        return Ok(Vec::new());
    };
    coins
        .iter()
        .map(|c| {
            Ok(CanonicalBalance {
                asset: req_str(c, "coin")?.to_string(),
                wallet_balance: req_fixed(c, "walletBalance")?,
                available_balance: opt_fixed(c, "availableToWithdraw")?,
                update_time,
            })
        })
        .collect()
}
