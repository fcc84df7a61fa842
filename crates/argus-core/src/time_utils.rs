/// Wall-clock milliseconds since the Unix epoch; saturates instead of failing.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns true when `timestamp_unix_ms` is no older than `window_ms` relative to `now_unix_ms`.
///
/// Timestamps in the future (clock skew between threads) always count as inside the window.
pub fn is_within_window_ms(timestamp_unix_ms: u64, now_unix_ms: u64, window_ms: u64) -> bool {
    now_unix_ms.saturating_sub(timestamp_unix_ms) <= window_ms
}
