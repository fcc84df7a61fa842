pub(super) const ROOT_ENDPOINT: &str = "/";
pub(super) const PROCESSES_MONITORED_ENDPOINT: &str = "/processes/monitored";
pub(super) const PROCESSES_METRICS_ENDPOINT: &str = "/processes/metrics";
pub(super) const PROCESSES_START_ENDPOINT: &str = "/processes/start";
pub(super) const PROCESS_DETAIL_ENDPOINT: &str = "/processes/{pid}";
pub(super) const PROCESS_OUTPUT_ENDPOINT: &str = "/processes/{pid}/output";
pub(super) const ERRORS_LATEST_ENDPOINT: &str = "/errors/latest";
pub(super) const ERRORS_STREAM_ENDPOINT: &str = "/errors/stream";
pub(super) const DEV_START_ENDPOINT: &str = "/dev/start/{kind}";
pub(super) const DEV_STOP_ENDPOINT: &str = "/dev/stop/{kind}";
pub(super) const DEV_STATUS_ENDPOINT: &str = "/dev/status";
pub(super) const WS_ERRORS_ENDPOINT: &str = "/ws/errors";
pub(super) const WS_PROCESSES_ENDPOINT: &str = "/ws/processes";

pub(super) const DEFAULT_OUTPUT_LINES: usize = 50;
pub(super) const DEFAULT_ERRORS_SINCE: &str = "5m";
pub(super) const START_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
pub(super) const WS_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
pub(super) const WS_SEND_TIMEOUT_SECONDS: u64 = 5;
