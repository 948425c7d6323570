//! Normalizer and reconciliation throughput
//!
//! Measures the hot path of a private stream: JSON decode plus canonical
//! conversion per venue, and applying order events to the engine state.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use omnisync_exchanges::prelude::*;
use omnisync_exchanges::sync::UserDataState;
use omnisync_tests::*;

const BYBIT_ORDER: &str = r#"{"id":"1","topic":"order","creationTime":1,"data":[{"symbol":"BTCUSDT","orderId":"abc","side":"Buy","orderType":"Limit","cancelType":"UNKNOWN","price":"30000","qty":"0.01","timeInForce":"GTC","orderStatus":"New","orderLinkId":"link-1","stopOrderType":"","triggerDirection":0,"rejectReason":"EC_NoError","avgPrice":"0","cumExecQty":"0","positionIdx":0,"triggerPrice":"","triggerBy":"","reduceOnly":false,"closeOnTrigger":false,"updatedTime":"1700000000000"}]}"#;

const BINANCE_DEPTH: &str = r#"{"stream":"btcusdt@depth5@100ms","data":{"e":"depthUpdate","E":1571889248277,"T":1571889248276,"s":"BTCUSDT","U":390497796,"u":390497878,"pu":390497794,"b":[["7403.89","0.002"],["7403.90","3.906"],["7404.00","1.428"],["7404.85","5.239"],["7405.43","2.562"]],"a":[["7405.96","3.340"],["7406.63","4.525"],["7407.08","2.475"],["7407.15","4.800"],["7407.20","0.175"]]}}"#;

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    group.throughput(Throughput::Elements(1));

    let binance_user = Normalizer::new(Venue::BinanceFutures, ChannelKind::UserData);
    let binance_order = binance_order_frame("BTCUSDT", "bench", "LIMIT", "NEW");
    group.bench_function("binance_order_update", |b| {
        b.iter(|| binance_user.normalize(black_box(&binance_order)))
    });

    let binance_depth = Normalizer::new(Venue::BinanceFutures, ChannelKind::Depth);
    group.bench_function("binance_depth5", |b| {
        b.iter(|| binance_depth.normalize(black_box(BINANCE_DEPTH)))
    });

    let bybit_user = Normalizer::new(Venue::Bybit, ChannelKind::UserData);
    group.bench_function("bybit_order", |b| b.iter(|| bybit_user.normalize(black_box(BYBIT_ORDER))));

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    let orders: Vec<CanonicalOrder> = (0..1_000)
        .map(|i| limit_order(if i % 2 == 0 { "BTCUSDT" } else { "ETHUSDT" }, &format!("c{i}"), OrderStatus::New))
        .collect();
    group.throughput(Throughput::Elements(orders.len() as u64));

    group.bench_function("apply_1000_orders", |b| {
        b.iter_batched(
            || orders.clone(),
            |orders| {
                let mut state = UserDataState::new(PositionMode::OneWay);
                for order in orders {
                    state.apply_order(order);
                }
                black_box(state.order_count())
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("replace_1000_orders", |b| {
        b.iter_batched(
            || orders.clone(),
            |orders| {
                let mut state = UserDataState::new(PositionMode::OneWay);
                black_box(state.replace_orders(orders).len())
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_reconcile);
criterion_main!(benches);
