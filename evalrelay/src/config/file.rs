//! Configuration file handling for ~/.evalrelay/config.ini.
//!
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use super::settings::*;

use crate::backend::{BackendConfig, BatchConfig, RemoteConfig};
use crate::dispatch::DispatchSettings;
use crate::status::MIN_STATUS_ROWS;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// A value the selected backend needs is not set
    #[error("Missing configuration: {section}.{key} is required for the {backend} backend")]
    MissingValue {
        section: String,
        key: String,
        backend: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.evalrelay/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create a default config file at `path` if none exists.
    ///
    /// Returns true if the file was created.
    pub fn ensure_exists(path: &Path) -> Result<bool, ConfigFileError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to(path)?;
        Ok(true)
    }

    /// Every data file location, derived from `[paths] data_dir`.
    pub fn paths(&self) -> DataPaths {
        let data_dir = &self.paths.data_dir;
        DataPaths {
            results_dir: data_dir.join("results"),
            status_file: data_dir.join("status.csv"),
            unresolved_file: data_dir.join("errors").join("UnReceiveData.json"),
            queue_file: data_dir.join("send_data.json"),
            history_dir: data_dir.join("history"),
            lock_file: data_dir.join("opt.lock"),
            work_dir: self
                .batch
                .work_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("work")),
        }
    }

    /// Cycle timing from `[dispatch]`.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        let dispatch = &self.dispatch;
        DispatchSettings {
            poll_interval: Duration::from_secs(dispatch.poll_interval_secs),
            idle_check_interval: Duration::from_millis(dispatch.idle_check_interval_ms),
            idle_timeout: match dispatch.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            setup_hold: Duration::from_secs(dispatch.setup_hold_secs),
        }
    }

    /// Configuration of the backend selected by `[dispatch] backend`.
    pub fn backend_config(&self) -> Result<BackendConfig, ConfigFileError> {
        let backend = self.dispatch.backend;
        let missing = |section: &str, key: &str| ConfigFileError::MissingValue {
            section: section.to_string(),
            key: key.to_string(),
            backend: backend.to_string(),
        };

        match backend {
            BackendKind::Remote => {
                let remote = &self.remote;
                Ok(BackendConfig::Remote(RemoteConfig {
                    match_id: remote
                        .match_id
                        .clone()
                        .ok_or_else(|| missing("remote", "match_id"))?,
                    user_name: remote
                        .user_name
                        .clone()
                        .ok_or_else(|| missing("remote", "user_name"))?,
                    send_command: remote.send_command.clone(),
                    get_command: remote.get_command.clone(),
                }))
            }
            BackendKind::Batch => {
                let batch = &self.batch;
                Ok(BackendConfig::Batch(BatchConfig {
                    family: batch.family.clone(),
                    model: batch.model.clone(),
                    script_template: batch
                        .script_template
                        .clone()
                        .ok_or_else(|| missing("batch", "script_template"))?,
                    submit_command: batch.submit_command.clone(),
                    work_dir: self.paths().work_dir,
                }))
            }
        }
    }

    /// Checks cross-field constraints that parsing alone cannot.
    pub(super) fn validate(&self) -> Result<(), ConfigFileError> {
        if self.status.limit < MIN_STATUS_ROWS {
            return Err(ConfigFileError::InvalidValue {
                section: "status".to_string(),
                key: "limit".to_string(),
                value: self.status.limit.to_string(),
                reason: format!("must be at least {}", MIN_STATUS_ROWS),
            });
        }
        Ok(())
    }
}

/// Get the path to the config directory (~/.evalrelay).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".evalrelay")
}

/// Get the path to the config file (~/.evalrelay/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
