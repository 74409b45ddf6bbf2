use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch. Clocks set before 1970 report 0.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
