//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use evalrelay::backend::BackendError;
use evalrelay::config::{ConfigFileError, ConfigKeyError};
use evalrelay::dispatch::DispatchError;
use evalrelay::history::HistoryError;
use evalrelay::status::StatusError;
use evalrelay::store::StoreError;

/// Exit code used when the user interrupts a command.
const EXIT_INTERRUPTED: i32 = 130;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Configuration file could not be read or is incomplete
    ConfigFile(ConfigFileError),
    /// Invalid solution input
    Input(String),
    /// Backend could not be created
    Backend(BackendError),
    /// Dispatch cycle failed
    Dispatch(DispatchError),
    /// Persisted state could not be read or written
    Store(StoreError),
    /// Lifecycle log could not be read
    Status(StatusError),
    /// History query failed
    History(HistoryError),
    /// Async runtime or background process could not be started
    Runtime(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        if self.is_cancelled() {
            eprintln!("Interrupted.");
            process::exit(EXIT_INTERRUPTED);
        }

        eprintln!("Error: {}", self);

        match self {
            CliError::Dispatch(DispatchError::Poll { .. }) => {
                eprintln!();
                eprintln!("The submitted solutions are still being evaluated.");
                eprintln!("Resume collecting their results with: evalrelay run --re-receive");
            }
            CliError::Dispatch(DispatchError::IdleTimeout { .. }) => {
                eprintln!();
                eprintln!("Another cycle for the same evaluator is still running.");
                eprintln!("Check it with: evalrelay status");
            }
            CliError::ConfigFile(ConfigFileError::MissingValue { section, key, .. }) => {
                eprintln!();
                eprintln!("Set it with: evalrelay config set {}.{} <value>", section, key);
            }
            _ => {}
        }

        process::exit(1)
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, CliError::Dispatch(e) if e.is_cancelled())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Input(msg) => write!(f, "Invalid input: {}", msg),
            CliError::Backend(e) => write!(f, "Failed to set up backend: {}", e),
            CliError::Dispatch(e) => write!(f, "Dispatch failed: {}", e),
            CliError::Store(e) => write!(f, "{}", e),
            CliError::Status(e) => write!(f, "{}", e),
            CliError::History(e) => write!(f, "History query failed: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Backend(e) => Some(e),
            CliError::Dispatch(e) => Some(e),
            CliError::Store(e) => Some(e),
            CliError::Status(e) => Some(e),
            CliError::History(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<ConfigKeyError> for CliError {
    fn from(e: ConfigKeyError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<BackendError> for CliError {
    fn from(e: BackendError) -> Self {
        CliError::Backend(e)
    }
}

impl From<DispatchError> for CliError {
    fn from(e: DispatchError) -> Self {
        CliError::Dispatch(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}

impl From<StatusError> for CliError {
    fn from(e: StatusError) -> Self {
        CliError::Status(e)
    }
}

impl From<HistoryError> for CliError {
    fn from(e: HistoryError) -> Self {
        CliError::History(e)
    }
}
