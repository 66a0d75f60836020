//! Stream id generation and l2met-style counters.

use log::info;
use uuid::Uuid;

/// Returns a fresh 32-character stream id (hex of 16 random bytes).
///
/// Uniqueness is probabilistic; there is no registry-side collision check.
pub fn new_stream_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Emits a counter increment on the log stream.
pub fn count(name: &str) {
    info!("count#{name}=1");
}

/// Emits a counter increment with extra context, e.g. `error=...`.
pub fn count_with_data(name: &str, data: &str) {
    info!("count#{name}=1 {data}");
}
