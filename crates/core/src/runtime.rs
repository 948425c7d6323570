//! monoio runtime bootstrap
//!
//! All streaming and reconciliation work runs on one single-threaded
//! runtime with the timer driver enabled (reconnect delays, heartbeats and
//! request timeouts all depend on it).

use monoio::{FusionDriver, RuntimeBuilder};
use tracing::info;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Thread name used in log lines
    pub thread_name: String,
    /// io_uring submission queue depth (ignored on the legacy driver)
    pub entries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "omnisync-main".to_string(),
            entries: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Build a timer-enabled runtime and drive `f` to completion.
    ///
    /// Uses io_uring when the kernel supports it and falls back to the
    /// epoll-based legacy driver otherwise.
    pub fn start<F, Fut>(self, f: F) -> std::io::Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future,
    {
        let mut runtime = RuntimeBuilder::<FusionDriver>::new()
            .with_entries(self.entries)
            .enable_timer()
            .build()?;

        info!("▶️  Starting runtime on {}", self.thread_name);
        let output = runtime.block_on(f());
        info!("⏹️  Runtime {} stopped", self.thread_name);
        Ok(output)
    }
}

/// Run `f` on a default runtime
pub fn run<F, Fut>(f: F) -> std::io::Result<Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future,
{
    RuntimeConfig::default().start(f)
}
