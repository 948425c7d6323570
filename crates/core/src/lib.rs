//! # OmniSync Core
//!
//! Runtime and primitive types shared by the OmniSync exchange crates.
//!
//! ## Building blocks
//!
//! 1. **Single-threaded async with monoio** - one runtime per trading thread
//! 2. **Precision timing** - millisecond exchange clocks, microsecond perf timers
//! 3. **Fixed-point arithmetic** - exact decimal prices and quantities
//! 4. **Unified logging** - tracing with an env-filtered fmt subscriber
//! 5. **Id generation** - nanoid-backed subscription and request ids

pub mod runtime;
pub mod timing;
pub mod fixed;
pub mod logging;
pub mod id_gen;

// Re-export commonly used items
pub use runtime::{run, RuntimeConfig};
pub use timing::{millis, nanos, PerfTimer, Timestamp};
pub use fixed::{Fixed, FixedError};
pub use logging::init_logging;
pub use id_gen::{generate_id, generate_id_with_prefix, next_sequence};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::runtime::{run, RuntimeConfig};
    pub use crate::timing::{millis, nanos, PerfTimer, Timestamp};
    pub use crate::fixed::{Fixed, FixedError};
    pub use crate::id_gen::{generate_id, generate_id_with_prefix, next_sequence};
    pub use crate::logging::init_logging;

    // Common external types
    pub use monoio;
    pub use serde::{Deserialize, Serialize};
}
