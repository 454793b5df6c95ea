//! Wall-clock helpers.
//!
//! Job timestamps (`send_at`, `started_at`, `finished_at`) are stored as
//! milliseconds since the Unix epoch, with `0` meaning "not yet".

use chrono::Utc;

/// Current time in milliseconds since the Unix epoch.
#[inline]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
