//! Global logging setup. The subscriber slot is process-wide, so these run
//! one at a time.

use omnisync_core::logging::init_logging_with_default;
use omnisync_core::prelude::*;
use omnisync_core::{log_error, log_latency};
use serial_test::serial;

#[test]
#[serial]
fn test_init_logging_is_idempotent() {
    init_logging();
    init_logging();
    init_logging_with_default("omnisync_exchanges=debug,info");
    tracing::info!("📝 logging initialized twice without panic");
}

#[test]
#[serial]
fn test_latency_macros_after_init() {
    init_logging();
    let timer = PerfTimer::start("logging_test");
    log_latency!("fast path", 250u64);
    log_latency!("slow path", 2_500u64);
    log_error!("scripted failure", "connection reset");
    assert!(timer.elapsed_micros() < 10_000_000);
}

#[test]
#[serial]
fn test_runtime_runs_with_logging() {
    init_logging();
    let value = run(|| async {
        monoio::time::sleep(std::time::Duration::from_millis(1)).await;
        millis()
    })
    .unwrap();
    assert!(value > 0);
}
