use super::*;

#[derive(Debug, Default, Clone, Copy)]
pub(super) struct RateLimitBucket {
    pub(super) window_started_unix_ms: u64,
    pub(super) accepted_requests: u32,
    pub(super) rejected_requests: u32,
}

#[derive(Debug, Default)]
pub(super) struct RateLimitState {
    pub(super) buckets: HashMap<IpAddr, RateLimitBucket>,
    pub(super) rate_limited_requests: u64,
}

/// Fixed one-minute window per client address. A limit of zero disables the check.
pub(super) fn enforce_start_rate_limit(
    state: &ArgusGatewayState,
    client: IpAddr,
) -> Result<(), ApiError> {
    let max_requests = state.supervisor.config().rate_limit_per_minute;
    if max_requests == 0 {
        return Ok(());
    }
    let now_unix_ms = current_unix_timestamp_ms();
    let mut rate_limit = lock_or_recover(&state.rate_limit);

    rate_limit.buckets.retain(|_, bucket| {
        now_unix_ms.saturating_sub(bucket.window_started_unix_ms) < START_RATE_LIMIT_WINDOW_MS
    });
    let bucket = rate_limit.buckets.entry(client).or_default();
    if bucket.window_started_unix_ms == 0 {
        bucket.window_started_unix_ms = now_unix_ms;
    }
    if bucket.accepted_requests >= max_requests {
        bucket.rejected_requests = bucket.rejected_requests.saturating_add(1);
        rate_limit.rate_limited_requests = rate_limit.rate_limited_requests.saturating_add(1);
        warn!(%client, max_requests, "process start rate limit exceeded");
        return Err(ApiError::too_many_requests(format!(
            "rate limit exceeded: max {max_requests} process starts per minute"
        )));
    }
    bucket.accepted_requests = bucket.accepted_requests.saturating_add(1);
    Ok(())
}
