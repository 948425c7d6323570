//! Identifier generation
//!
//! nanoid for opaque ids (subscriptions, observers, connections) and a
//! process-wide counter for request ids on venue control frames.

use nanoid::nanoid;
use std::sync::atomic::{AtomicU64, Ordering};

static GLOBAL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// 12 character nanoid
pub fn generate_id() -> String {
    nanoid!(12)
}

/// `<prefix>-<nanoid>`, e.g. `sub-V1StGXR8_Z5j`
pub fn generate_id_with_prefix(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid!(12))
}

/// Monotonic sequence, used as the `id` of JSON control frames
pub fn next_sequence() -> u64 {
    GLOBAL_COUNTER.fetch_add(1, Ordering::SeqCst)
}
