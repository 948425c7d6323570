//! Unified logging
//!
//! Every crate logs through `tracing`. Binaries and tests call
//! [`init_logging`] once; the filter comes from `RUST_LOG` and defaults to
//! `info`.

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Install the global subscriber with a fallback directive used when
/// `RUST_LOG` is unset, e.g. `"omnisync_exchanges=debug,info"`.
pub fn init_logging_with_default(default_directive: &str) {
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::TRACE)
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(default_directive)),
            )
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .finish();

        // Another subscriber (e.g. a test harness) may already own the global slot
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::info!("📝 Initialized tracing logging");
        }
    });
}

#[macro_export]
macro_rules! log_latency {
    ($operation:expr, $duration_micros:expr) => {
        if $duration_micros < 1000 {
            tracing::debug!("⚡ {} completed in {}μs", $operation, $duration_micros);
        } else {
            tracing::info!("⚡ {} completed in {:.3}ms", $operation, $duration_micros as f64 / 1000.0);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($operation:expr, $error:expr) => {
        tracing::error!("❌ {} failed: {}", $operation, $error);
    };
}
