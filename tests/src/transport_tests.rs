//! Transport manager against the scripted connector: normalized delivery,
//! reconnect transparency and registry bookkeeping.

use omnisync_exchanges::prelude::*;
use omnisync_exchanges::testkit::{ScriptedConnector, ServerAction};
use omnisync_exchanges::{binance, bybit};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const BYBIT_TRADE: &str = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1672304486868,"data":[{"T":1672304486865,"s":"BTCUSDT","S":"Buy","v":"0.001","p":"16578.50","L":"PlusTick","i":"20f43950-d8dd-5b31-9112-a178eb6023af","BT":false}]}"#;

fn client(connector: &ScriptedConnector) -> StreamClient {
    let config = TransportConfig::default().with_reconnect_delay_ms(10);
    StreamClient::with_connector(Arc::new(connector.clone()), config)
}

type Recorded<T> = Rc<RefCell<Vec<T>>>;

fn recorders() -> (Recorded<CanonicalEvent>, Recorded<ConnectionStatus>) {
    (Rc::new(RefCell::new(Vec::new())), Rc::new(RefCell::new(Vec::new())))
}

#[monoio::test(enable_timer = true)]
async fn test_bybit_trades_survive_reconnect() {
    let connector = ScriptedConnector::new();
    let streams = client(&connector);
    let spec = bybit::public_channel(
        &BybitConfig::default(),
        ChannelKind::Trade,
        vec![bybit::trade_topic("BTCUSDT")],
    )
    .unwrap();

    let (events, statuses) = recorders();
    let (event_sink, status_sink) = (events.clone(), statuses.clone());
    let handle = streams
        .subscribe(
            spec,
            move |event| event_sink.borrow_mut().push(event),
            move |status| status_sink.borrow_mut().push(status),
        )
        .await
        .unwrap();

    let first = connector.session(0).unwrap();
    first.send_text(BYBIT_TRADE);
    first.push(ServerAction::Drop);
    monoio::time::sleep(Duration::from_millis(50)).await;

    let second = connector.session(1).unwrap();
    second.send_text(BYBIT_TRADE);
    monoio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(events.borrow().len(), 2);
    assert_eq!(
        *statuses.borrow(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
            ConnectionStatus::Reconnecting,
            ConnectionStatus::Open,
        ]
    );

    // The subscribe frame is replayed on the new socket
    let replayed: Value = serde_json::from_str(&second.sent()[0]).unwrap();
    assert_eq!(replayed["op"], "subscribe");
    assert_eq!(replayed["args"][0], "publicTrade.BTCUSDT");
    assert!(!handle.is_closed());

    handle.disconnect();
    monoio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(statuses.borrow().last(), Some(&ConnectionStatus::Closed));
}

#[monoio::test(enable_timer = true)]
async fn test_malformed_frames_do_not_drop_connection() {
    let connector = ScriptedConnector::new();
    let streams = client(&connector);
    let spec = binance::public_channel(
        &BinanceConfig::default(),
        ChannelKind::BookTicker,
        vec![binance::book_ticker_topic("BTCUSDT")],
    )
    .unwrap();

    let (events, _) = recorders();
    let sink = events.clone();
    let handle = streams
        .subscribe(spec, move |event| sink.borrow_mut().push(event), |_| {})
        .await
        .unwrap();

    let session = connector.session(0).unwrap();
    session.send_text("not json at all");
    session.send_text(r#"{"e":"bookTicker","s":"BTCUSDT"}"#);
    session.send_text(r#"{"result":null,"id":1}"#);
    session.send_text(
        r#"{"stream":"btcusdt@bookTicker","data":{"e":"bookTicker","u":400900217,"E":1568014460893,"T":1568014460891,"s":"BTCUSDT","b":"25.35190000","B":"31.21000000","a":"25.36520000","A":"40.66000000"}}"#,
    );
    monoio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(events.borrow().len(), 1);
    assert!(matches!(events.borrow()[0], CanonicalEvent::BookTicker(_)));
    assert_eq!(connector.connect_count(), 1);
    assert!(!session.is_closed());
    handle.disconnect();
}

#[monoio::test(enable_timer = true)]
async fn test_close_all_sockets_empties_registry() {
    let connector = ScriptedConnector::new();
    let streams = client(&connector);
    let config = BinanceConfig::default();

    let mut handles = Vec::new();
    for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
        let spec = binance::public_channel(&config, ChannelKind::Trade, vec![binance::trade_topic(symbol)]).unwrap();
        handles.push(streams.subscribe(spec, |_| {}, |_| {}).await.unwrap());
    }
    assert_eq!(streams.active_ids().len(), 3);

    streams.close_all_sockets();
    monoio::time::sleep(Duration::from_millis(10)).await;

    assert!(streams.active_ids().is_empty());
    assert!(handles.iter().all(|h| h.is_closed()));
    assert!((0..3).all(|i| connector.session(i).unwrap().is_closed()));
}

#[monoio::test(enable_timer = true)]
async fn test_failed_first_connect_reports_closed() {
    let connector = ScriptedConnector::new();
    connector.fail_next_connects(1);
    let streams = client(&connector);
    let spec = binance::public_channel(
        &BinanceConfig::default(),
        ChannelKind::Kline,
        vec![binance::kline_topic("BTCUSDT", "1m")],
    )
    .unwrap();

    let (_, statuses) = recorders();
    let sink = statuses.clone();
    let result = streams
        .subscribe(spec, |_| {}, move |status| sink.borrow_mut().push(status))
        .await;

    assert!(result.is_err());
    assert_eq!(*statuses.borrow(), vec![ConnectionStatus::Connecting, ConnectionStatus::Closed]);
    monoio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(connector.connect_count(), 1);
}
