use thiserror::Error;

/// Reasons a [`crate::ProcessCommand`] is refused before any OS resource is allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandValidationError {
    #[error("command cannot be empty")]
    EmptyCommand,
    #[error("command too long: {length} bytes exceeds limit of {limit}")]
    CommandTooLong { length: usize, limit: usize },
    #[error("command '{command}' is not in the allowed commands list")]
    CommandNotAllowed { command: String },
    #[error("working directory does not exist: {path}")]
    WorkingDirectoryMissing { path: String },
    #[error("command not found: {command}")]
    ExecutableNotFound { command: String },
    #[error("invalid environment variable name '{key}'")]
    InvalidEnvironmentKey { key: String },
    #[error("invalid error pattern '{pattern}': {reason}")]
    InvalidErrorPattern { pattern: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("command validation failed: {0}")]
    Validation(#[from] CommandValidationError),
    #[error("maximum number of processes ({limit}) reached")]
    ProcessLimitReached { limit: usize },
    #[error("failed to start process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },
    #[error("failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },
    #[error("supervisor is shutting down")]
    ShuttingDown,
    #[error("supervisor requires a running tokio runtime")]
    RuntimeUnavailable,
}
