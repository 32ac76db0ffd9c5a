/// Current UTC timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Timestamp `days` days from now, in milliseconds.
pub fn millis_after_days(now: i64, days: i64) -> i64 {
    now + days * 24 * 60 * 60 * 1000
}
