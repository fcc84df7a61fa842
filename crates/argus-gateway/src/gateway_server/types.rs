use super::*;

#[derive(Debug)]
pub(super) struct ApiError {
    pub(super) status: StatusCode,
    pub(super) code: &'static str,
    pub(super) message: String,
}

impl ApiError {
    pub(super) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(super) fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub(super) fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub(super) fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message)
    }
}

impl From<SupervisorError> for ApiError {
    fn from(error: SupervisorError) -> Self {
        let message = error.to_string();
        match error {
            SupervisorError::Validation(_) => Self::bad_request("invalid_command", message),
            SupervisorError::ProcessLimitReached { .. } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "process_limit_reached",
                message,
            ),
            SupervisorError::ShuttingDown => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", message)
            }
            SupervisorError::ProcessNotFound { .. } => Self::not_found("process_not_found", message),
            SupervisorError::SpawnFailed { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "spawn_failed", message)
            }
            SupervisorError::TerminationFailed { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "termination_failed",
                message,
            ),
            SupervisorError::RuntimeUnavailable => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_type = if self.status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        (
            self.status,
            Json(json!({
                "error": {
                    "type": error_type,
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OutputQuery {
    pub(super) lines: Option<String>,
    pub(super) stream: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct SinceQuery {
    pub(super) since: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ProcessListResponse {
    pub(super) processes: Vec<MonitoredProcess>,
    pub(super) count: usize,
    pub(super) timestamp_unix_ms: u64,
}

pub(super) fn parse_pid(raw: &str) -> Result<u32, ApiError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| ApiError::bad_request("invalid_pid", format!("invalid pid '{raw}'")))
}

pub(super) fn parse_json_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|error| {
        ApiError::bad_request("malformed_json", format!("failed to parse request body: {error}"))
    })
}
