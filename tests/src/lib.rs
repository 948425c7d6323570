//! Shared fixtures for the OmniSync integration suites
//!
//! Canonical record builders, raw venue frames and an engine wired to the
//! in-memory connector and gateway from `omnisync_exchanges::testkit`.

use omnisync_core::prelude::*;
use omnisync_exchanges::prelude::*;
use omnisync_exchanges::testkit::{ScriptedConnector, StaticGateway};
use std::sync::Arc;
use url::Url;

/// Private Binance channel pointing at a fake listen key
pub fn binance_user_spec() -> ChannelSpec {
    ChannelSpec {
        venue: Venue::BinanceFutures,
        kind: ChannelKind::UserData,
        url: Url::parse("wss://fstream.binance.com/ws/fixture-listen-key").expect("static url"),
        topics: Vec::new(),
        credentials: None,
        heartbeat: Heartbeat::ServerPing,
    }
}

pub fn limit_order(symbol: &str, client_id: &str, status: OrderStatus) -> CanonicalOrder {
    CanonicalOrder {
        symbol: symbol.to_string(),
        client_order_id: client_id.to_string(),
        order_id: format!("{client_id}-venue"),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        time_in_force: TimeInForce::GoodTillCanceled,
        original_quantity: Fixed::ONE,
        original_price: Fixed::from_i64(30_000),
        average_price: Fixed::ZERO,
        stop_price: Fixed::ZERO,
        status,
        executed_quantity: Fixed::ZERO,
        last_filled_quantity: Fixed::ZERO,
        last_filled_price: Fixed::ZERO,
        reduce_only: false,
        close_all: false,
        working_type: WorkingType::ContractPrice,
        position_side: PositionSide::Both,
        is_algo_order: false,
        update_time: 0,
    }
}

pub fn position(symbol: &str, side: PositionSide, amount: i64) -> CanonicalPosition {
    CanonicalPosition {
        symbol: symbol.to_string(),
        position_side: side,
        position_amount: Fixed::from_i64(amount),
        entry_price: Fixed::from_i64(30_000),
        unrealized_pnl: Fixed::ZERO,
        update_time: 0,
    }
}

/// Binance ORDER_TRADE_UPDATE frame
pub fn binance_order_frame(symbol: &str, client_id: &str, order_type: &str, status: &str) -> String {
    format!(
        r#"{{"e":"ORDER_TRADE_UPDATE","E":1700000000000,"T":1700000000000,"o":{{"s":"{symbol}","c":"{client_id}","S":"BUY","o":"{order_type}","f":"GTC","q":"1","p":"30000","ap":"0","sp":"0","x":"TRADE","X":"{status}","i":42,"l":"0","z":"0","L":"0","T":1700000000000,"R":false,"wt":"CONTRACT_PRICE","ps":"BOTH","cp":false}}}}"#
    )
}

/// Binance ACCOUNT_UPDATE frame with one position row
pub fn binance_account_frame(symbol: &str, amount: &str, side: &str) -> String {
    format!(
        r#"{{"e":"ACCOUNT_UPDATE","E":1700000000001,"T":1700000000001,"a":{{"m":"ORDER","B":[{{"a":"USDT","wb":"1000","cw":"1000","bc":"0"}}],"P":[{{"s":"{symbol}","pa":"{amount}","ep":"30000","cr":"0","up":"0","mt":"cross","iw":"0","ps":"{side}"}}]}}}}"#
    )
}

/// Engine over the scripted connector with a short reconnect delay
pub fn scripted_engine(
    gateway: StaticGateway,
    connector: &ScriptedConnector,
    config: EngineConfig,
) -> UserDataEngine<StaticGateway> {
    let transport = TransportConfig::default().with_reconnect_delay_ms(10);
    let streams = StreamClient::with_connector(Arc::new(connector.clone()), transport);
    UserDataEngine::new(gateway, streams, config)
}
