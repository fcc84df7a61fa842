//! Supervisor configuration: serde defaults, optional JSON file, `ARGUS_*` env overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "argus-config.json";
pub const DEFAULT_MAX_PROCESSES: usize = 10;
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 10_000;
pub const DEFAULT_ERROR_STREAM_BUFFER: usize = 1_000;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 10;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STATUS_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RESTART_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RESTART_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
pub const DEFAULT_RESTART_BACKOFF_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "npm", "node", "go", "python", "yarn", "cargo", "next", "vite", "jest", "make", "mvn", "gradle",
];

pub const MAX_PROCESSES_ENV: &str = "ARGUS_MAX_PROCESSES";
pub const MAX_OUTPUT_LINES_ENV: &str = "ARGUS_MAX_OUTPUT_LINES";
pub const ERROR_STREAM_BUFFER_ENV: &str = "ARGUS_ERROR_STREAM_BUFFER";
pub const CLEANUP_INTERVAL_ENV: &str = "ARGUS_CLEANUP_INTERVAL";
pub const ALLOWED_COMMANDS_ENV: &str = "ARGUS_ALLOWED_COMMANDS";
pub const RATE_LIMIT_PER_MINUTE_ENV: &str = "ARGUS_RATE_LIMIT_PER_MINUTE";
pub const PROCESS_TIMEOUT_ENV: &str = "ARGUS_PROCESS_TIMEOUT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidEnvValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Exponential backoff budget applied to auto-restarting processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_initial: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RESTART_MAX_ATTEMPTS,
            backoff_initial: DEFAULT_RESTART_BACKOFF_INITIAL,
            backoff_max: DEFAULT_RESTART_BACKOFF_MAX,
        }
    }
}

impl RestartPolicy {
    /// Delay before restart number `attempt + 1`: `initial * 2^attempt`, capped at `backoff_max`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_initial
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_processes: usize,
    pub max_output_lines: usize,
    pub error_stream_buffer: usize,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub status_broadcast_interval: Duration,
    pub worker_count: usize,
    pub rate_limit_per_minute: u32,
    pub allowed_commands: Vec<String>,
    pub restart: RestartPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            error_stream_buffer: DEFAULT_ERROR_STREAM_BUFFER,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            status_broadcast_interval: DEFAULT_STATUS_BROADCAST_INTERVAL,
            worker_count: default_worker_count(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|command| (*command).to_string())
                .collect(),
            restart: RestartPolicy::default(),
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_processes == 0 {
            return Err(ConfigError::Invalid(
                "max_processes must be greater than 0".to_string(),
            ));
        }
        if self.max_output_lines == 0 {
            return Err(ConfigError::Invalid(
                "max_output_lines must be greater than 0".to_string(),
            ));
        }
        if self.error_stream_buffer == 0 {
            return Err(ConfigError::Invalid(
                "error_stream_buffer must be greater than 0".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_count must be greater than 0".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() || self.status_broadcast_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "cleanup_interval and status_broadcast_interval must be non-zero".to_string(),
            ));
        }
        if self.restart.backoff_initial > self.restart.backoff_max {
            return Err(ConfigError::Invalid(
                "restart.backoff_initial must not exceed restart.backoff_max".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_command_allowed(&self, executable: &str) -> bool {
        self.allowed_commands
            .iter()
            .any(|allowed| allowed == executable)
    }
}

/// Loads config from `path` (required to exist) or from `argus-config.json` in the
/// current directory when present, then applies process-environment overrides.
pub fn load_supervisor_config(path: Option<&Path>) -> Result<SupervisorConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
            if default_path.is_file() {
                read_config_file(default_path)?
            } else {
                SupervisorConfig::default()
            }
        }
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn read_config_file(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Applies `ARGUS_*` overrides read through `lookup`; blank values are ignored.
pub fn apply_env_overrides<F>(config: &mut SupervisorConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(value) = read(MAX_PROCESSES_ENV) {
        config.max_processes = parse_positive_usize(MAX_PROCESSES_ENV, &value)?;
    }
    if let Some(value) = read(MAX_OUTPUT_LINES_ENV) {
        config.max_output_lines = parse_positive_usize(MAX_OUTPUT_LINES_ENV, &value)?;
    }
    if let Some(value) = read(ERROR_STREAM_BUFFER_ENV) {
        config.error_stream_buffer = parse_positive_usize(ERROR_STREAM_BUFFER_ENV, &value)?;
    }
    if let Some(value) = read(CLEANUP_INTERVAL_ENV) {
        config.cleanup_interval = parse_duration(CLEANUP_INTERVAL_ENV, &value)?;
    }
    if let Some(value) = read(PROCESS_TIMEOUT_ENV) {
        config.stop_timeout = parse_duration(PROCESS_TIMEOUT_ENV, &value)?;
    }
    if let Some(value) = read(RATE_LIMIT_PER_MINUTE_ENV) {
        config.rate_limit_per_minute =
            value
                .parse::<u32>()
                .map_err(|error| ConfigError::InvalidEnvValue {
                    key: RATE_LIMIT_PER_MINUTE_ENV,
                    value: value.clone(),
                    reason: error.to_string(),
                })?;
    }
    if let Some(value) = read(ALLOWED_COMMANDS_ENV) {
        let commands = value
            .split(',')
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if commands.is_empty() {
            return Err(ConfigError::InvalidEnvValue {
                key: ALLOWED_COMMANDS_ENV,
                value,
                reason: "expected a comma-separated list of executable names".to_string(),
            });
        }
        config.allowed_commands = commands;
    }
    Ok(())
}

fn parse_positive_usize(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| ConfigError::InvalidEnvValue {
            key,
            value: value.to_string(),
            reason: error.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidEnvValue {
            key,
            value: value.to_string(),
            reason: "value must be greater than 0".to_string(),
        });
    }
    Ok(parsed)
}

fn parse_duration(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|error| ConfigError::InvalidEnvValue {
        key,
        value: value.to_string(),
        reason: error.to_string(),
    })
}
