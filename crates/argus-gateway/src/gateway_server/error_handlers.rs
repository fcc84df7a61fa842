use super::types::SinceQuery;
use super::*;

/// Serves both `/errors/latest` and `/errors/stream`: each process's last error
/// recorded within the `since` window.
pub(super) async fn handle_recent_errors(
    State(state): State<Arc<ArgusGatewayState>>,
    Query(query): Query<SinceQuery>,
) -> Response {
    let (since_label, since) = parse_since_window(query.since.as_deref());
    let now = current_unix_timestamp_ms();
    let since_ms = u64::try_from(since.as_millis()).unwrap_or(u64::MAX);
    let errors = state.supervisor.latest_errors(since);
    Json(json!({
        "since": since_label,
        "cutoff_unix_ms": now.saturating_sub(since_ms),
        "error_count": errors.len(),
        "errors": errors,
        "timestamp_unix_ms": now,
    }))
    .into_response()
}

/// Parses a humantime window such as `30s` or `5m`; anything unparseable falls back to `5m`.
pub(super) fn parse_since_window(raw: Option<&str>) -> (String, Duration) {
    let fallback = || {
        (
            DEFAULT_ERRORS_SINCE.to_string(),
            Duration::from_secs(5 * 60),
        )
    };
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return fallback();
    };
    match humantime::parse_duration(raw) {
        Ok(duration) => (raw.to_string(), duration),
        Err(_) => fallback(),
    }
}
