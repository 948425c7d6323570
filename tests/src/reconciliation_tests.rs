//! User-data reconciliation: lifecycle scenarios, observer fan-out and
//! open-set invariants under random event streams.

use omnisync_core::prelude::*;
use omnisync_exchanges::prelude::*;
use omnisync_exchanges::testkit::{ScriptedConnector, ServerAction, StaticGateway};
use omnisync_tests::*;
use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

// ============================================================================
// LIFECYCLE
// ============================================================================

#[cfg(test)]
mod lifecycle {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_order_fill_and_position_close() {
        let connector = ScriptedConnector::new();
        let gateway = StaticGateway::new(binance_user_spec())
            .with_orders(vec![limit_order("BTCUSDT", "O1", OrderStatus::New)])
            .with_positions(vec![position("BTCUSDT", PositionSide::Long, 2)]);
        let engine = scripted_engine(gateway, &connector, EngineConfig::new(PositionMode::Hedge));

        engine.init().await.unwrap();
        assert_eq!(engine.open_orders_for("BTCUSDT").len(), 1);
        assert!(engine.positions_for("BTCUSDT")[0].is_in_position());

        let order_views = Rc::new(RefCell::new(Vec::new()));
        let sink = order_views.clone();
        let _orders = engine.on_order_update(move |symbol, orders| {
            sink.borrow_mut().push((symbol.to_string(), orders.to_vec()));
        });
        let position_views = Rc::new(RefCell::new(Vec::new()));
        let sink = position_views.clone();
        let _positions = engine.on_position_update(move |symbol, positions| {
            sink.borrow_mut().push((symbol.to_string(), positions.to_vec()));
        });

        let session = connector.session(0).unwrap();
        session.send_text(binance_order_frame("BTCUSDT", "O1", "LIMIT", "FILLED"));
        monoio::time::sleep(Duration::from_millis(10)).await;

        assert!(engine.open_orders_for("BTCUSDT").is_empty());
        assert_eq!(order_views.borrow().len(), 1);
        assert!(order_views.borrow()[0].1.is_empty());

        session.send_text(binance_account_frame("BTCUSDT", "0", "LONG"));
        monoio::time::sleep(Duration::from_millis(10)).await;

        let positions = engine.positions_for("BTCUSDT");
        assert_eq!(positions.len(), 1);
        assert!(!positions[0].is_in_position());
        assert!(engine.open_positions().is_empty());
        assert_eq!(position_views.borrow().len(), 1);
        assert_eq!(engine.balances()[0].asset, "USDT");

        engine.destroy();
    }

    #[monoio::test(enable_timer = true)]
    async fn test_snapshot_replaces_stale_orders() {
        let connector = ScriptedConnector::new();
        let gateway = StaticGateway::new(binance_user_spec())
            .with_orders(vec![limit_order("BTCUSDT", "stale", OrderStatus::New)]);
        let engine = scripted_engine(gateway.clone(), &connector, EngineConfig::default());
        engine.init().await.unwrap();

        let touched = Rc::new(RefCell::new(Vec::new()));
        let sink = touched.clone();
        let _sub = engine.on_order_update(move |symbol, _| sink.borrow_mut().push(symbol.to_string()));

        gateway.set_orders(vec![limit_order("ETHUSDT", "fresh", OrderStatus::New)]);
        engine.request_all_orders().await.unwrap();

        assert!(engine.open_orders_for("BTCUSDT").is_empty());
        assert_eq!(engine.open_orders_for("ETHUSDT").len(), 1);
        // Symbols that vanished are notified too
        assert_eq!(*touched.borrow(), vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        engine.destroy();
    }

    #[monoio::test(enable_timer = true)]
    async fn test_failed_snapshot_keeps_state() {
        let connector = ScriptedConnector::new();
        let gateway = StaticGateway::new(binance_user_spec())
            .with_positions(vec![position("BTCUSDT", PositionSide::Both, 3)]);
        let engine = scripted_engine(gateway.clone(), &connector, EngineConfig::default());
        engine.init().await.unwrap();

        gateway.fail_positions(ExchangeError::Timeout("positionRisk".to_string()));
        let err = engine.request_all_positions().await.unwrap_err();

        assert!(matches!(err, ExchangeError::SnapshotFailed { part: SnapshotPart::Positions, .. }));
        assert_eq!(engine.open_positions().len(), 1);
        engine.destroy();
    }

    #[monoio::test(enable_timer = true)]
    async fn test_reinit_after_session_loss() {
        let connector = ScriptedConnector::new();
        let gateway = StaticGateway::new(binance_user_spec());
        let engine = scripted_engine(gateway.clone(), &connector, EngineConfig::default());
        engine.init().await.unwrap();

        connector
            .session(0)
            .unwrap()
            .push(ServerAction::Text(r#"{"e":"listenKeyExpired","E":1}"#.to_string()));
        monoio::time::sleep(Duration::from_millis(20)).await;
        assert!(!engine.is_session_valid());

        engine.init().await.unwrap();
        assert!(engine.is_session_valid());
        assert_eq!(gateway.channel_requests(), 2);
        assert_eq!(connector.session_count(), 2);
        engine.destroy();
    }
}

// ============================================================================
// OBSERVERS
// ============================================================================

#[cfg(test)]
mod observers {
    use super::*;

    fn idle_engine() -> UserDataEngine<StaticGateway> {
        scripted_engine(
            StaticGateway::new(binance_user_spec()),
            &ScriptedConnector::new(),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_fan_out_and_unsubscribe() {
        let engine = idle_engine();
        let first = Rc::new(RefCell::new(0));
        let second = Rc::new(RefCell::new(0));

        let counter = first.clone();
        let first_sub = engine.on_order_update(move |_, _| *counter.borrow_mut() += 1);
        let counter = second.clone();
        let _second_sub = engine.on_order_update(move |_, _| *counter.borrow_mut() += 1);

        engine
            .apply(UserEvent::Orders(vec![limit_order("BTCUSDT", "a", OrderStatus::New)]))
            .unwrap();
        assert_eq!((*first.borrow(), *second.borrow()), (1, 1));

        assert!(first_sub.unsubscribe());
        engine
            .apply(UserEvent::Orders(vec![limit_order("BTCUSDT", "a", OrderStatus::Canceled)]))
            .unwrap();
        assert_eq!((*first.borrow(), *second.borrow()), (1, 2));
    }

    #[test]
    fn test_one_notification_per_symbol() {
        let engine = idle_engine();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _sub = engine.on_order_update(move |symbol, orders| {
            sink.borrow_mut().push((symbol.to_string(), orders.len()));
        });

        engine
            .apply(UserEvent::Orders(vec![
                limit_order("BTCUSDT", "a", OrderStatus::New),
                limit_order("BTCUSDT", "b", OrderStatus::New),
                limit_order("ETHUSDT", "c", OrderStatus::New),
            ]))
            .unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![("BTCUSDT".to_string(), 2), ("ETHUSDT".to_string(), 1)]
        );
    }

    #[test]
    fn test_manual_trigger_redelivers_current_view() {
        let engine = idle_engine();
        engine
            .apply(UserEvent::Orders(vec![limit_order("BTCUSDT", "a", OrderStatus::New)]))
            .unwrap();
        engine
            .apply(UserEvent::Account {
                positions: vec![position("BTCUSDT", PositionSide::Both, 1)],
                balances: Vec::new(),
            })
            .unwrap();

        let orders = Rc::new(RefCell::new(Vec::new()));
        let sink = orders.clone();
        let _o = engine.on_order_update(move |_, view| sink.borrow_mut().push(view.len()));
        let positions = Rc::new(RefCell::new(Vec::new()));
        let sink = positions.clone();
        let _p = engine.on_position_update(move |_, view| sink.borrow_mut().push(view.len()));

        engine.trigger_order_update("BTCUSDT");
        engine.trigger_order_update("SOLUSDT");
        engine.trigger_position_update("BTCUSDT");

        assert_eq!(*orders.borrow(), vec![1, 0]);
        assert_eq!(*positions.borrow(), vec![1]);
    }

    #[test]
    fn test_observer_may_reenter_engine() {
        let engine = Rc::new(idle_engine());
        let observed = Rc::new(RefCell::new(0usize));

        let reentrant = engine.clone();
        let sink = observed.clone();
        let _sub = engine.on_order_update(move |_, _| {
            *sink.borrow_mut() = reentrant.open_orders().len();
        });

        engine
            .apply(UserEvent::Orders(vec![limit_order("BTCUSDT", "a", OrderStatus::New)]))
            .unwrap();
        assert_eq!(*observed.borrow(), 1);
    }

    #[test]
    fn test_unsubscribe_after_engine_dropped() {
        let engine = idle_engine();
        let sub = engine.on_position_update(|_, _| {});
        drop(engine);
        assert!(!sub.unsubscribe());
    }
}

// ============================================================================
// INVARIANTS (property-based)
// ============================================================================

#[derive(Debug, Clone)]
struct OrderStep {
    symbol: &'static str,
    client_id: &'static str,
    status: OrderStatus,
    market: bool,
}

fn order_step() -> impl Strategy<Value = OrderStep> {
    (
        prop::sample::select(vec!["BTCUSDT", "ETHUSDT"]),
        prop::sample::select(vec!["a", "b", "c"]),
        prop::sample::select(vec![
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::PendingCancel,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Expired,
            OrderStatus::Rejected,
        ]),
        prop::bool::weighted(0.1),
    )
        .prop_map(|(symbol, client_id, status, market)| OrderStep {
            symbol,
            client_id,
            status,
            market,
        })
}

proptest! {
    #[test]
    fn prop_open_set_matches_last_event_per_key(steps in prop::collection::vec(order_step(), 1..60)) {
        let engine = scripted_engine(
            StaticGateway::new(binance_user_spec()),
            &ScriptedConnector::new(),
            EngineConfig::default(),
        );
        let mut expected: HashMap<(String, String), OrderStatus> = HashMap::new();

        for step in &steps {
            let mut order = limit_order(step.symbol, step.client_id, step.status);
            if step.market {
                order.order_type = OrderType::Market;
            }
            engine.apply(UserEvent::Orders(vec![order])).unwrap();

            let key = (step.symbol.to_string(), step.client_id.to_string());
            if step.status.is_terminal() || step.market {
                expected.remove(&key);
            } else {
                expected.insert(key, step.status);
            }
        }

        let open = engine.open_orders();
        prop_assert_eq!(open.len(), expected.len());
        for order in &open {
            prop_assert!(!order.status.is_terminal());
            prop_assert!(order.order_type != OrderType::Market);
            let key = (order.symbol.clone(), order.client_order_id.clone());
            prop_assert_eq!(expected.get(&key), Some(&order.status));
        }
    }

    #[test]
    fn prop_one_way_mode_keeps_one_record_per_symbol(
        amounts in prop::collection::vec((prop::sample::select(vec!["BTCUSDT", "ETHUSDT"]), -5i64..5), 1..40)
    ) {
        let engine = scripted_engine(
            StaticGateway::new(binance_user_spec()),
            &ScriptedConnector::new(),
            EngineConfig::new(PositionMode::OneWay),
        );
        let mut last: HashMap<&str, i64> = HashMap::new();
        for (symbol, amount) in &amounts {
            engine
                .apply(UserEvent::Account {
                    positions: vec![position(symbol, PositionSide::Both, *amount)],
                    balances: Vec::new(),
                })
                .unwrap();
            last.insert(*symbol, *amount);
        }

        for (symbol, amount) in last {
            let records = engine.positions_for(symbol);
            prop_assert_eq!(records.len(), 1);
            prop_assert_eq!(records[0].position_amount, Fixed::from_i64(amount));
            prop_assert_eq!(records[0].is_in_position(), amount != 0);
        }
    }
}
