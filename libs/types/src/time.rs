//! Engine clock

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds. Order timestamps, expirations, and
/// request TTLs all use this resolution.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
