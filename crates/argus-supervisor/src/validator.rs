//! Pre-spawn validation of [`ProcessCommand`] requests.

use std::path::PathBuf;

use crate::classifier::CustomPatterns;
use crate::error::CommandValidationError;
use crate::types::ProcessCommand;

pub const MAX_COMMAND_LENGTH_BYTES: usize = 1_000;

/// A command that passed validation, with its resolved executable and working directory.
#[derive(Debug)]
pub struct ValidatedCommand {
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub patterns: CustomPatterns,
}

/// Checks run in order: empty, length, allow-list, environment keys, working directory,
/// executable resolution, caller error patterns. The allow-list runs before any
/// filesystem probe so refused names never touch `PATH`. Commands must be a bare
/// allow-listed name; anything path-qualified is refused and names resolve only
/// through `PATH`, never relative to the working directory.
pub fn validate_process_command(
    command: &ProcessCommand,
    allowed_commands: &[String],
) -> Result<ValidatedCommand, CommandValidationError> {
    let executable = command.command.trim();
    if executable.is_empty() {
        return Err(CommandValidationError::EmptyCommand);
    }
    if command.command.len() > MAX_COMMAND_LENGTH_BYTES {
        return Err(CommandValidationError::CommandTooLong {
            length: command.command.len(),
            limit: MAX_COMMAND_LENGTH_BYTES,
        });
    }

    if executable.contains('/') || executable.contains('\\') || executable != command.command {
        return Err(CommandValidationError::CommandNotAllowed {
            command: command.command.clone(),
        });
    }
    if !allowed_commands
        .iter()
        .any(|allowed| allowed.as_str() == executable)
    {
        return Err(CommandValidationError::CommandNotAllowed {
            command: executable.to_string(),
        });
    }

    for key in command.environment.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(CommandValidationError::InvalidEnvironmentKey { key: key.clone() });
        }
    }

    let working_dir = if command.working_dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        command.working_dir.clone()
    };
    if !working_dir.is_dir() {
        return Err(CommandValidationError::WorkingDirectoryMissing {
            path: working_dir.display().to_string(),
        });
    }

    let executable_path = resolve_executable(executable)?;
    let patterns = CustomPatterns::compile(&command.error_patterns)?;

    Ok(ValidatedCommand {
        executable: executable_path,
        working_dir,
        patterns,
    })
}

fn resolve_executable(executable: &str) -> Result<PathBuf, CommandValidationError> {
    which::which(executable).map_err(|_| CommandValidationError::ExecutableNotFound {
        command: executable.to_string(),
    })
}
