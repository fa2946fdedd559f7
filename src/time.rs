use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Used as the entropy source for the
/// dispatch engine's randomized phase-1 wait pick (`engine::pick_wait_secs`).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_utc() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
