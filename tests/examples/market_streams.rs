//! Public market data from both venues through one transport
//!
//! Subscribes to trades and top-of-book on Binance futures and Bybit
//! linear, then prints a running count per venue and channel.
//!
//! ```text
//! cargo run -p omnisync-tests --example market_streams
//! ```

use omnisync_core::prelude::*;
use omnisync_exchanges::prelude::*;
use omnisync_exchanges::{binance, bybit};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

type Counters = Rc<RefCell<BTreeMap<String, u64>>>;

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let symbol = std::env::var("OMNISYNC_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string());

    run(move || async move {
        let streams = StreamClient::new(TransportConfig::default());
        let counters: Counters = Rc::default();

        let binance_config = BinanceConfig::default();
        let bybit_config = BybitConfig::default();
        let specs = vec![
            binance::public_channel(&binance_config, ChannelKind::Trade, vec![binance::trade_topic(&symbol)])?,
            binance::public_channel(&binance_config, ChannelKind::BookTicker, vec![binance::book_ticker_topic(&symbol)])?,
            bybit::public_channel(&bybit_config, ChannelKind::Trade, vec![bybit::trade_topic(&symbol)])?,
            bybit::public_channel(&bybit_config, ChannelKind::Depth, vec![bybit::depth_topic(&symbol, 50)])?,
        ];

        for spec in specs {
            let label = format!("{:?}/{:?}", spec.venue, spec.kind);
            let sink = counters.clone();
            let status_label = label.clone();
            streams
                .subscribe(
                    spec,
                    move |event| {
                        *sink.borrow_mut().entry(label.clone()).or_default() += 1;
                        debug!("{:?}", event);
                    },
                    move |status| info!("🔗 {} is {}", status_label, status),
                )
                .await?;
        }

        for _ in 0..6 {
            monoio::time::sleep(Duration::from_secs(10)).await;
            for (label, count) in counters.borrow().iter() {
                info!("📈 {}: {} events", label, count);
            }
        }

        streams.close_all_sockets();
        Ok::<_, anyhow::Error>(())
    })?
}
