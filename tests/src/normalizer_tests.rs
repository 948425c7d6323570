//! Venue-to-canonical mapping tables for both adapters, plus the
//! normalizer's handling of control and malformed frames.

use omnisync_core::prelude::*;
use omnisync_exchanges::prelude::*;
use omnisync_exchanges::{binance, bybit};
use omnisync_tests::*;
use rstest::*;

// ============================================================================
// BINANCE TABLES
// ============================================================================

#[cfg(test)]
mod binance_tables {
    use super::*;
    use binance::converters::*;

    #[rstest]
    #[case("NEW", OrderStatus::New)]
    #[case("PARTIALLY_FILLED", OrderStatus::PartiallyFilled)]
    #[case("FILLED", OrderStatus::Filled)]
    #[case("CANCELED", OrderStatus::Canceled)]
    #[case("PENDING_CANCEL", OrderStatus::PendingCancel)]
    #[case("REJECTED", OrderStatus::Rejected)]
    #[case("EXPIRED", OrderStatus::Expired)]
    #[case("EXPIRED_IN_MATCH", OrderStatus::Expired)]
    fn test_order_status(#[case] raw: &str, #[case] expected: OrderStatus) {
        assert_eq!(map_order_status(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("LIMIT", OrderType::Limit)]
    #[case("MARKET", OrderType::Market)]
    #[case("STOP", OrderType::Stop)]
    #[case("STOP_MARKET", OrderType::StopMarket)]
    #[case("TAKE_PROFIT", OrderType::TakeProfit)]
    #[case("TAKE_PROFIT_MARKET", OrderType::TakeProfitMarket)]
    #[case("TRAILING_STOP_MARKET", OrderType::TrailingStopMarket)]
    fn test_order_type(#[case] raw: &str, #[case] expected: OrderType) {
        assert_eq!(map_order_type(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("GTC", TimeInForce::GoodTillCanceled)]
    #[case("IOC", TimeInForce::ImmediateOrCancel)]
    #[case("FOK", TimeInForce::FillOrKill)]
    #[case("GTX", TimeInForce::PostOnly)]
    #[case("", TimeInForce::GoodTillCanceled)]
    fn test_time_in_force(#[case] raw: &str, #[case] expected: TimeInForce) {
        assert_eq!(map_time_in_force(raw), expected);
    }

    #[rstest]
    #[case("BOTH", PositionSide::Both)]
    #[case("LONG", PositionSide::Long)]
    #[case("SHORT", PositionSide::Short)]
    fn test_position_side(#[case] raw: &str, #[case] expected: PositionSide) {
        assert_eq!(map_position_side(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("BOGUS")]
    #[case("new")]
    fn test_unknown_status_is_malformed(#[case] raw: &str) {
        assert!(matches!(map_order_status(raw), Err(ExchangeError::MalformedMessage(_))));
    }
}

// ============================================================================
// BYBIT TABLES
// ============================================================================

#[cfg(test)]
mod bybit_tables {
    use super::*;
    use bybit::converters::*;

    #[rstest]
    #[case("Created", "", "", OrderStatus::Pending)]
    #[case("New", "", "", OrderStatus::New)]
    #[case("Untriggered", "", "", OrderStatus::New)]
    #[case("PartiallyFilled", "", "", OrderStatus::PartiallyFilled)]
    #[case("Triggered", "", "", OrderStatus::Triggered)]
    #[case("Filled", "EC_NoError", "UNKNOWN", OrderStatus::Filled)]
    #[case("Filled", "EC_OrigClOrdIDDoesNotExist", "CancelByUser", OrderStatus::Canceled)]
    #[case("Cancelled", "", "CancelByUser", OrderStatus::Canceled)]
    #[case("PartiallyFilledCanceled", "", "", OrderStatus::Canceled)]
    #[case("Rejected", "EC_InvalidQty", "", OrderStatus::Rejected)]
    #[case("Deactivated", "", "", OrderStatus::Expired)]
    fn test_order_status(
        #[case] raw: &str,
        #[case] reject_reason: &str,
        #[case] cancel_type: &str,
        #[case] expected: OrderStatus,
    ) {
        assert_eq!(map_order_status(raw, reject_reason, cancel_type).unwrap(), expected);
    }

    #[rstest]
    #[case("Limit", "", OrderSide::Buy, 0, OrderType::Limit)]
    #[case("Market", "UNKNOWN", OrderSide::Sell, 0, OrderType::Market)]
    #[case("Market", "StopLoss", OrderSide::Sell, 2, OrderType::StopMarket)]
    #[case("Limit", "Stop", OrderSide::Buy, 1, OrderType::Stop)]
    #[case("Market", "TakeProfit", OrderSide::Sell, 1, OrderType::TakeProfitMarket)]
    #[case("Limit", "PartialTakeProfit", OrderSide::Buy, 0, OrderType::TakeProfit)]
    #[case("Market", "TrailingStop", OrderSide::Sell, 2, OrderType::TrailingStopMarket)]
    fn test_order_type(
        #[case] order_type: &str,
        #[case] stop_order_type: &str,
        #[case] side: OrderSide,
        #[case] direction: i64,
        #[case] expected: OrderType,
    ) {
        assert_eq!(map_order_type(order_type, stop_order_type, side, direction).unwrap(), expected);
    }

    #[rstest]
    #[case(0, PositionSide::Both)]
    #[case(1, PositionSide::Long)]
    #[case(2, PositionSide::Short)]
    fn test_position_idx(#[case] idx: i64, #[case] expected: PositionSide) {
        assert_eq!(map_position_idx(idx).unwrap(), expected);
    }

    #[rstest]
    #[case("PostOnly", TimeInForce::PostOnly)]
    #[case("IOC", TimeInForce::ImmediateOrCancel)]
    #[case("FOK", TimeInForce::FillOrKill)]
    #[case("GTC", TimeInForce::GoodTillCanceled)]
    fn test_time_in_force(#[case] raw: &str, #[case] expected: TimeInForce) {
        assert_eq!(map_time_in_force(raw), expected);
    }

    #[test]
    fn test_unknown_position_idx_is_malformed() {
        assert!(map_position_idx(7).is_err());
    }
}

// ============================================================================
// NORMALIZER FRAMES
// ============================================================================

#[cfg(test)]
mod frames {
    use super::*;

    #[fixture]
    fn binance_user() -> Normalizer {
        Normalizer::new(Venue::BinanceFutures, ChannelKind::UserData)
    }

    #[fixture]
    fn bybit_user() -> Normalizer {
        Normalizer::new(Venue::Bybit, ChannelKind::UserData)
    }

    #[rstest]
    #[case(r#"{"result":null,"id":1}"#)]
    #[case(r#"{"error":{"code":2,"msg":"Invalid request"},"id":7}"#)]
    fn test_binance_replies_are_control(binance_user: Normalizer, #[case] raw: &str) {
        assert_eq!(binance_user.normalize(raw).unwrap(), None);
    }

    #[rstest]
    #[case(r#"{"success":true,"ret_msg":"pong","conn_id":"x","op":"ping"}"#)]
    #[case(r#"{"success":true,"ret_msg":"","conn_id":"x","op":"subscribe"}"#)]
    #[case(r#"{"success":true,"ret_msg":"","conn_id":"x","op":"auth"}"#)]
    fn test_bybit_acks_are_control(bybit_user: Normalizer, #[case] raw: &str) {
        assert_eq!(bybit_user.normalize(raw).unwrap(), None);
    }

    #[rstest]
    fn test_bybit_rejected_auth_expires_session(bybit_user: Normalizer) {
        let raw = r#"{"success":false,"ret_msg":"Request not authorized","conn_id":"x","op":"auth"}"#;
        match bybit_user.normalize(raw).unwrap() {
            Some(CanonicalEvent::User(UserEvent::SessionExpired { reason })) => {
                assert!(reason.contains("Request not authorized"));
            }
            other => panic!("expected session expiry, got {other:?}"),
        }
    }

    #[rstest]
    #[case("{not json")]
    #[case(r#"{"E":1}"#)]
    fn test_binance_malformed_frames(binance_user: Normalizer, #[case] raw: &str) {
        assert!(binance_user.normalize(raw).is_err());
    }

    #[rstest]
    fn test_binance_unknown_event_ignored(binance_user: Normalizer) {
        let raw = r#"{"e":"MARGIN_CALL","E":1,"cw":"3.16","p":[]}"#;
        assert_eq!(binance_user.normalize(raw).unwrap(), None);
    }

    #[rstest]
    fn test_binance_order_update(binance_user: Normalizer) {
        let raw = binance_order_frame("BTCUSDT", "O1", "LIMIT", "NEW");
        let Some(CanonicalEvent::User(UserEvent::Orders(orders))) = binance_user.normalize(&raw).unwrap() else {
            panic!("expected an order event");
        };
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].client_order_id, "O1");
        assert_eq!(orders[0].status, OrderStatus::New);
        assert_eq!(orders[0].original_price, Fixed::from_i64(30_000));
        assert!(!orders[0].is_algo_order);
    }

    #[rstest]
    fn test_binance_account_update(binance_user: Normalizer) {
        let raw = binance_account_frame("ETHUSDT", "-0.5", "BOTH");
        let Some(CanonicalEvent::User(UserEvent::Account { positions, balances })) =
            binance_user.normalize(&raw).unwrap()
        else {
            panic!("expected an account event");
        };
        assert_eq!(positions[0].position_amount, Fixed::from_str_exact("-0.5").unwrap());
        assert!(positions[0].is_in_position());
        assert_eq!(balances[0].wallet_balance, Fixed::from_i64(1000));
    }

    #[test]
    fn test_combined_stream_envelope() {
        let normalizer = Normalizer::new(Venue::BinanceFutures, ChannelKind::Trade);
        let raw = r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":123,"s":"BTCUSDT","a":5933014,"p":"0.001","q":"100","f":100,"l":105,"T":123,"m":true}}"#;
        let Some(CanonicalEvent::Trades(trades)) = normalizer.normalize(raw).unwrap() else {
            panic!("expected trades");
        };
        assert_eq!(trades[0].taker_side, OrderSide::Sell);
        assert_eq!(trades[0].trade_id, "5933014");
    }

    #[test]
    fn test_bybit_order_topic() {
        let normalizer = Normalizer::new(Venue::Bybit, ChannelKind::UserData);
        let raw = r#"{"id":"1","topic":"order","creationTime":1,"data":[{"symbol":"BTCUSDT","orderId":"abc","side":"Buy","orderType":"Limit","cancelType":"UNKNOWN","price":"30000","qty":"0.01","timeInForce":"PostOnly","orderStatus":"New","orderLinkId":"link-1","stopOrderType":"","triggerDirection":0,"rejectReason":"EC_NoError","avgPrice":"0","cumExecQty":"0","positionIdx":1,"triggerPrice":"","triggerBy":"","reduceOnly":false,"closeOnTrigger":false,"updatedTime":"1700000000000"}]}"#;
        let Some(CanonicalEvent::User(UserEvent::Orders(orders))) = normalizer.normalize(raw).unwrap() else {
            panic!("expected an order event");
        };
        assert_eq!(orders[0].client_order_id, "link-1");
        assert_eq!(orders[0].time_in_force, TimeInForce::PostOnly);
        assert_eq!(orders[0].position_side, PositionSide::Long);
    }
}
