//! Configuration key access and validation.
//!
//! Type-safe get/set of configuration values by `section.key` name, used by
//! `evalrelay config list|get|set`.

use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use super::parser::{expand_tilde, optional_path, optional_string};
use super::settings::{BackendKind, ConfigFile};
use crate::status::MIN_STATUS_ROWS;

/// Errors that can occur when getting or setting configuration values.
#[derive(Debug, Error)]
pub enum ConfigKeyError {
    /// Unknown configuration key.
    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),

    /// Validation failed for the value.
    #[error("Invalid value for {key}: {reason}")]
    ValidationFailed { key: String, reason: String },
}

/// Supported configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    DispatchBackend,
    DispatchPollIntervalSecs,
    DispatchIdleCheckIntervalMs,
    DispatchIdleTimeoutSecs,
    DispatchSetupHoldSecs,

    RemoteMatchId,
    RemoteUserName,
    RemoteSendCommand,
    RemoteGetCommand,
    RemoteListCommand,
    RemoteHistoryLimit,

    BatchFamily,
    BatchModel,
    BatchScriptTemplate,
    BatchSubmitCommand,
    BatchWorkDir,

    StatusLimit,
    PathsDataDir,
    LoggingFile,
}

impl FromStr for ConfigKey {
    type Err = ConfigKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == lower)
            .ok_or_else(|| ConfigKeyError::UnknownKey(s.to_string()))
    }
}

impl ConfigKey {
    /// Get the canonical key name (e.g., "remote.match_id").
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::DispatchBackend => "dispatch.backend",
            ConfigKey::DispatchPollIntervalSecs => "dispatch.poll_interval_secs",
            ConfigKey::DispatchIdleCheckIntervalMs => "dispatch.idle_check_interval_ms",
            ConfigKey::DispatchIdleTimeoutSecs => "dispatch.idle_timeout_secs",
            ConfigKey::DispatchSetupHoldSecs => "dispatch.setup_hold_secs",
            ConfigKey::RemoteMatchId => "remote.match_id",
            ConfigKey::RemoteUserName => "remote.user_name",
            ConfigKey::RemoteSendCommand => "remote.send_command",
            ConfigKey::RemoteGetCommand => "remote.get_command",
            ConfigKey::RemoteListCommand => "remote.list_command",
            ConfigKey::RemoteHistoryLimit => "remote.history_limit",
            ConfigKey::BatchFamily => "batch.family",
            ConfigKey::BatchModel => "batch.model",
            ConfigKey::BatchScriptTemplate => "batch.script_template",
            ConfigKey::BatchSubmitCommand => "batch.submit_command",
            ConfigKey::BatchWorkDir => "batch.work_dir",
            ConfigKey::StatusLimit => "status.limit",
            ConfigKey::PathsDataDir => "paths.data_dir",
            ConfigKey::LoggingFile => "logging.file",
        }
    }

    /// Get the section name (e.g., "remote").
    pub fn section(&self) -> &'static str {
        self.name().split('.').next().unwrap_or("")
    }

    /// Get the key name within the section (e.g., "match_id").
    pub fn key_name(&self) -> &'static str {
        self.name().split('.').nth(1).unwrap_or("")
    }

    /// Get the current value as it would appear in `config.ini`.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::DispatchBackend => config.dispatch.backend.to_string(),
            ConfigKey::DispatchPollIntervalSecs => config.dispatch.poll_interval_secs.to_string(),
            ConfigKey::DispatchIdleCheckIntervalMs => {
                config.dispatch.idle_check_interval_ms.to_string()
            }
            ConfigKey::DispatchIdleTimeoutSecs => config.dispatch.idle_timeout_secs.to_string(),
            ConfigKey::DispatchSetupHoldSecs => config.dispatch.setup_hold_secs.to_string(),
            ConfigKey::RemoteMatchId => config.remote.match_id.clone().unwrap_or_default(),
            ConfigKey::RemoteUserName => config.remote.user_name.clone().unwrap_or_default(),
            ConfigKey::RemoteSendCommand => config.remote.send_command.clone(),
            ConfigKey::RemoteGetCommand => config.remote.get_command.clone(),
            ConfigKey::RemoteListCommand => config.remote.list_command.clone(),
            ConfigKey::RemoteHistoryLimit => config.remote.history_limit.to_string(),
            ConfigKey::BatchFamily => config.batch.family.clone(),
            ConfigKey::BatchModel => config.batch.model.clone().unwrap_or_default(),
            ConfigKey::BatchScriptTemplate => config
                .batch
                .script_template
                .as_deref()
                .map(path_to_display)
                .unwrap_or_default(),
            ConfigKey::BatchSubmitCommand => config.batch.submit_command.clone(),
            ConfigKey::BatchWorkDir => config
                .batch
                .work_dir
                .as_deref()
                .map(path_to_display)
                .unwrap_or_default(),
            ConfigKey::StatusLimit => config.status.limit.to_string(),
            ConfigKey::PathsDataDir => path_to_display(&config.paths.data_dir),
            ConfigKey::LoggingFile => path_to_display(&config.logging.file),
        }
    }

    /// Validate and set a value.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigKeyError> {
        self.validate(value)?;
        self.set_unchecked(config, value.trim());
        Ok(())
    }

    fn set_unchecked(&self, config: &mut ConfigFile, value: &str) {
        // Validation already guarantees these parse.
        let number = || value.parse::<u64>().unwrap_or_default();
        match self {
            ConfigKey::DispatchBackend => {
                config.dispatch.backend = value.parse::<BackendKind>().unwrap_or_default();
            }
            ConfigKey::DispatchPollIntervalSecs => config.dispatch.poll_interval_secs = number(),
            ConfigKey::DispatchIdleCheckIntervalMs => {
                config.dispatch.idle_check_interval_ms = number()
            }
            ConfigKey::DispatchIdleTimeoutSecs => config.dispatch.idle_timeout_secs = number(),
            ConfigKey::DispatchSetupHoldSecs => config.dispatch.setup_hold_secs = number(),
            ConfigKey::RemoteMatchId => config.remote.match_id = optional_string(value),
            ConfigKey::RemoteUserName => config.remote.user_name = optional_string(value),
            ConfigKey::RemoteSendCommand => config.remote.send_command = value.to_string(),
            ConfigKey::RemoteGetCommand => config.remote.get_command = value.to_string(),
            ConfigKey::RemoteListCommand => config.remote.list_command = value.to_string(),
            ConfigKey::RemoteHistoryLimit => config.remote.history_limit = number() as usize,
            ConfigKey::BatchFamily => config.batch.family = value.to_string(),
            ConfigKey::BatchModel => config.batch.model = optional_string(value),
            ConfigKey::BatchScriptTemplate => config.batch.script_template = optional_path(value),
            ConfigKey::BatchSubmitCommand => config.batch.submit_command = value.to_string(),
            ConfigKey::BatchWorkDir => config.batch.work_dir = optional_path(value),
            ConfigKey::StatusLimit => config.status.limit = number() as usize,
            ConfigKey::PathsDataDir => config.paths.data_dir = expand_tilde(value),
            ConfigKey::LoggingFile => config.logging.file = expand_tilde(value),
        }
    }

    /// Validate a value according to this key's specification.
    pub fn validate(&self, value: &str) -> Result<(), ConfigKeyError> {
        self.specification()
            .is_satisfied_by(value.trim())
            .map_err(|reason| ConfigKeyError::ValidationFailed {
                key: self.name().to_string(),
                reason,
            })
    }

    fn specification(&self) -> Box<dyn ValueSpecification> {
        match self {
            ConfigKey::DispatchBackend => Box::new(OneOfSpec::new(&["remote", "batch"])),
            ConfigKey::DispatchPollIntervalSecs
            | ConfigKey::DispatchIdleTimeoutSecs
            | ConfigKey::DispatchSetupHoldSecs
            | ConfigKey::RemoteHistoryLimit => Box::new(IntegerSpec { min: 0 }),
            ConfigKey::DispatchIdleCheckIntervalMs => Box::new(IntegerSpec { min: 1 }),
            ConfigKey::StatusLimit => Box::new(IntegerSpec {
                min: MIN_STATUS_ROWS as u64,
            }),
            ConfigKey::RemoteMatchId
            | ConfigKey::RemoteUserName
            | ConfigKey::BatchModel
            | ConfigKey::BatchScriptTemplate
            | ConfigKey::BatchWorkDir => Box::new(AnyStringSpec),
            ConfigKey::RemoteSendCommand
            | ConfigKey::RemoteGetCommand
            | ConfigKey::RemoteListCommand
            | ConfigKey::BatchFamily
            | ConfigKey::BatchSubmitCommand
            | ConfigKey::PathsDataDir
            | ConfigKey::LoggingFile => Box::new(NonEmptySpec),
        }
    }

    /// Get all supported configuration keys.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::DispatchBackend,
            ConfigKey::DispatchPollIntervalSecs,
            ConfigKey::DispatchIdleCheckIntervalMs,
            ConfigKey::DispatchIdleTimeoutSecs,
            ConfigKey::DispatchSetupHoldSecs,
            ConfigKey::RemoteMatchId,
            ConfigKey::RemoteUserName,
            ConfigKey::RemoteSendCommand,
            ConfigKey::RemoteGetCommand,
            ConfigKey::RemoteListCommand,
            ConfigKey::RemoteHistoryLimit,
            ConfigKey::BatchFamily,
            ConfigKey::BatchModel,
            ConfigKey::BatchScriptTemplate,
            ConfigKey::BatchSubmitCommand,
            ConfigKey::BatchWorkDir,
            ConfigKey::StatusLimit,
            ConfigKey::PathsDataDir,
            ConfigKey::LoggingFile,
        ]
    }
}

// ============================================================================
// Value Specifications
// ============================================================================

trait ValueSpecification {
    /// Returns Ok(()) if valid, Err(reason) if invalid.
    fn is_satisfied_by(&self, value: &str) -> Result<(), String>;
}

struct AnyStringSpec;

impl ValueSpecification for AnyStringSpec {
    fn is_satisfied_by(&self, _value: &str) -> Result<(), String> {
        Ok(())
    }
}

struct NonEmptySpec;

impl ValueSpecification for NonEmptySpec {
    fn is_satisfied_by(&self, value: &str) -> Result<(), String> {
        if value.is_empty() {
            Err("must not be empty".to_string())
        } else {
            Ok(())
        }
    }
}

struct OneOfSpec {
    options: &'static [&'static str],
}

impl OneOfSpec {
    fn new(options: &'static [&'static str]) -> Self {
        Self { options }
    }
}

impl ValueSpecification for OneOfSpec {
    fn is_satisfied_by(&self, value: &str) -> Result<(), String> {
        let lower = value.to_lowercase();
        if self.options.iter().any(|opt| *opt == lower) {
            Ok(())
        } else {
            Err(format!("must be one of: {}", self.options.join(", ")))
        }
    }
}

struct IntegerSpec {
    min: u64,
}

impl ValueSpecification for IntegerSpec {
    fn is_satisfied_by(&self, value: &str) -> Result<(), String> {
        match value.parse::<u64>() {
            Ok(n) if n >= self.min => Ok(()),
            _ => Err(format!("must be an integer of at least {}", self.min)),
        }
    }
}

/// Convert path to display string, collapsing home dir to ~.
fn path_to_display(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
