//! Centralized error types for the Klarfunk core library.
//!
//! This module provides one structured error type per collaborator:
//! - [`PlayerError`] for the media backend (process spawn, IPC, commands)
//! - [`CommandError`] for subprocess execution shared by nmcli and TTS
//! - [`NetworkError`] and [`TtsError`] layered on top of [`CommandError`]
//! - [`GpioError`] for the pin interface
//! - [`ConfigError`] for configuration validation
//!
//! Audio-engine operations never hand these to the controller. They are
//! logged at the engine boundary and reduced to a boolean outcome.

use std::time::Duration;

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Codes are stable identifiers used in log lines so failures can be
/// grepped for independently of the human-readable message.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Errors raised by a player backend instance.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The backend process could not be started.
    #[error("Failed to spawn player: {0}")]
    Spawn(String),

    /// The IPC channel to the backend could not be established or broke.
    #[error("Player IPC error: {0}")]
    Ipc(String),

    /// The backend rejected a command.
    #[error("Player command '{command}' failed: {reason}")]
    Command {
        /// Name of the rejected command.
        command: String,
        /// Error string reported by the backend.
        reason: String,
    },

    /// The instance was already terminated.
    #[error("Player instance terminated")]
    Terminated,

    /// The backend did not answer in time.
    #[error("Player did not answer within {0:?}")]
    Timeout(Duration),
}

impl ErrorCode for PlayerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "player_spawn_failed",
            Self::Ipc(_) => "player_ipc_error",
            Self::Command { .. } => "player_command_failed",
            Self::Terminated => "player_terminated",
            Self::Timeout(_) => "player_timeout",
        }
    }
}

/// Errors from running an external command with a timeout.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program does not exist on this system.
    #[error("Program not found: {0}")]
    NotFound(String),

    /// The program ran longer than allowed and was killed.
    #[error("{program} timed out after {timeout:?}")]
    Timeout {
        /// Program that timed out.
        program: String,
        /// Timeout that was exceeded.
        timeout: Duration,
    },

    /// Any other I/O failure while spawning or waiting.
    #[error("Failed to run {program}: {source}")]
    Io {
        /// Program that failed.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ErrorCode for CommandError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "command_not_found",
            Self::Timeout { .. } => "command_timeout",
            Self::Io { .. } => "command_io_error",
        }
    }
}

/// Errors from the NetworkManager (nmcli) collaborator.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// nmcli could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// nmcli ran but reported failure.
    #[error("nmcli failed: {0}")]
    Failed(String),
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Command(e) => e.code(),
            Self::Failed(_) => "nmcli_failed",
        }
    }
}

/// Errors from the text-to-speech collaborator.
#[derive(Debug, Error)]
pub enum TtsError {
    /// TTS is switched off in configuration.
    #[error("TTS disabled")]
    Disabled,

    /// Nothing to say after trimming.
    #[error("Empty text")]
    EmptyText,

    /// `speak_lines` was called with no lines.
    #[error("No lines to speak")]
    NoLines,

    /// The engine (or aplay) could not be run.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The engine ran but exited with failure.
    #[error("TTS failed: {0}")]
    Failed(String),
}

impl ErrorCode for TtsError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disabled => "tts_disabled",
            Self::EmptyText => "tts_empty_text",
            Self::NoLines => "tts_no_lines",
            Self::Command(e) => e.code(),
            Self::Failed(_) => "tts_failed",
        }
    }
}

/// Errors from the GPIO pin interface.
#[derive(Debug, Error)]
pub enum GpioError {
    /// A sysfs attribute could not be read or written.
    #[error("GPIO {pin}: {source}")]
    Io {
        /// BCM pin number.
        pin: u32,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The pin was read before it was set up.
    #[error("GPIO {0} is not configured")]
    NotConfigured(u32),

    /// The GPIO chip base could not be determined.
    #[error("GPIO chip not found: {0}")]
    ChipNotFound(String),

    /// The polling thread could not be started.
    #[error("Failed to start GPIO polling: {0}")]
    Thread(#[source] std::io::Error),
}

impl ErrorCode for GpioError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "gpio_io_error",
            Self::NotConfigured(_) => "gpio_not_configured",
            Self::ChipNotFound(_) => "gpio_chip_not_found",
            Self::Thread(_) => "gpio_thread_failed",
        }
    }
}

/// Configuration validation error naming the offending field.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid configuration: {field}: {message}")]
pub struct ConfigError {
    /// Dotted path of the offending field (e.g. `retry.max_attempts`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigError {
    /// Creates a validation error for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

/// Result alias for player backend operations.
pub type PlayerResult<T> = Result<T, PlayerError>;

/// Result alias for subprocess execution.
pub type CommandResult<T> = Result<T, CommandError>;

/// Result alias for nmcli operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Result alias for TTS operations.
pub type TtsResult<T> = Result<T, TtsError>;

/// Result alias for GPIO operations.
pub type GpioResult<T> = Result<T, GpioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_command_error_names_command() {
        let err = PlayerError::Command {
            command: "loadfile".into(),
            reason: "invalid parameter".into(),
        };
        assert_eq!(err.code(), "player_command_failed");
        assert_eq!(
            err.to_string(),
            "Player command 'loadfile' failed: invalid parameter"
        );
    }

    #[test]
    fn network_error_forwards_command_code() {
        let err = NetworkError::from(CommandError::NotFound("nmcli".into()));
        assert_eq!(err.code(), "command_not_found");
        assert_eq!(err.to_string(), "Program not found: nmcli");
    }

    #[test]
    fn config_error_display_includes_field() {
        let err = ConfigError::new("retry.max_attempts", "must be >= 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: retry.max_attempts: must be >= 1"
        );
    }
}
