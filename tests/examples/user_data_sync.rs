//! Live user-data reconciliation
//!
//! Loads open orders and positions over REST, follows the private stream,
//! and prints every change. Venue comes from `OMNISYNC_VENUE` (`binance` or
//! `bybit`), credentials from `.env`. Set `OMNISYNC_TESTNET=1` for testnet.
//!
//! ```text
//! cargo run -p omnisync-tests --example user_data_sync
//! ```

use omnisync_core::prelude::*;
use omnisync_exchanges::prelude::*;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let venue = std::env::var("OMNISYNC_VENUE").unwrap_or_else(|_| "binance".to_string());
    let testnet = std::env::var("OMNISYNC_TESTNET").is_ok_and(|v| v == "1");
    let minutes: u64 = std::env::var("OMNISYNC_RUN_MINUTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);

    run(move || async move {
        let result: anyhow::Result<()> = match venue.as_str() {
            "bybit" => {
                let config = if testnet { BybitConfig::testnet() } else { BybitConfig::default() };
                let config = config.with_env_credentials()?;
                let mode = config.position_mode;
                follow(BybitRest::new(config)?, mode, minutes).await
            }
            _ => {
                let config = if testnet { BinanceConfig::testnet() } else { BinanceConfig::default() };
                let config = config.with_env_credentials()?;
                let mode = config.position_mode;
                follow(BinanceFuturesRest::new(config)?, mode, minutes).await
            }
        };
        result
    })?
}

async fn follow<G: AccountGateway + 'static>(gateway: G, mode: PositionMode, minutes: u64) -> anyhow::Result<()> {
    let streams = StreamClient::new(TransportConfig::default());
    let engine = UserDataEngine::new(gateway, streams, EngineConfig::new(mode).with_resync_on_reconnect(true));

    let _orders = engine.on_order_update(|symbol, orders| {
        info!("📋 {} open orders: {}", symbol, orders.len());
        for order in orders {
            info!(
                "   {} {} {} {}@{} [{}]",
                order.client_order_id, order.side, order.order_type, order.original_quantity, order.original_price, order.status
            );
        }
    });
    let _positions = engine.on_position_update(|symbol, positions| {
        for position in positions {
            info!(
                "📊 {} {:?} amount={} entry={} upnl={}",
                symbol, position.position_side, position.position_amount, position.entry_price, position.unrealized_pnl
            );
        }
    });
    let _session = engine.on_session_error(|e| error!("🔒 Session lost, re-init required: {}", e));
    let _reconnect = engine.on_reconnect(|| warn!("🔄 User channel reconnected"));

    engine.init().await?;
    info!(
        "✅ Tracking {} open orders and {} open positions for {} minutes",
        engine.open_orders().len(),
        engine.open_positions().len(),
        minutes
    );

    let deadline = millis() + minutes * 60_000;
    while millis() < deadline {
        monoio::time::sleep(Duration::from_secs(10)).await;
        if !engine.is_session_valid() {
            warn!("⚠️  Session invalid, re-initializing");
            if let Err(e) = engine.init().await {
                error!("❌ Re-init failed: {}", e);
            }
        }
    }

    engine.destroy();
    Ok(())
}
