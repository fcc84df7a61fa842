//! Process supervision and real-time error streaming for Argus.
//!
//! Launches allow-listed developer commands, captures their output, classifies
//! error lines and fans the resulting [`StreamError`] values out to streaming
//! connections registered with the [`BroadcastHub`].

pub mod bounded_log;
pub mod broadcast;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
mod output_reader;
pub mod registry;
mod supervisor;
mod termination;
pub mod types;
pub mod validator;

pub use bounded_log::BoundedLog;
pub use broadcast::{
    BroadcastHub, BroadcastReport, ConnectionError, ConnectionId, StreamConnection,
    StreamSubscription, DEFAULT_CONNECTION_WRITE_TIMEOUT,
};
pub use classifier::{Classification, CustomPatterns, ErrorClassifier, LineOrigin, PatternTier};
pub use config::{
    apply_env_overrides, load_supervisor_config, read_config_file, ConfigError, RestartPolicy,
    SupervisorConfig,
};
pub use dispatcher::{ErrorDispatcher, ErrorSink, SubmitOutcome};
pub use error::{CommandValidationError, SupervisorError};
pub use metrics::{MetricsSnapshot, ProcessMetrics};
pub use supervisor::ProcessSupervisor;
pub use types::{
    ErrorSeverity, ErrorType, MonitoredProcess, OutputLog, OutputStream, ProcessCommand,
    ProcessExit, ProcessStatus, StreamError,
};
pub use validator::{validate_process_command, ValidatedCommand, MAX_COMMAND_LENGTH_BYTES};
