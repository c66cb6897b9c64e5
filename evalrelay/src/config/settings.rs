//! Configuration settings structs.
//!
//! Each struct corresponds to one INI section of `config.ini`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Parsed contents of `config.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Cycle timing and backend selection
    pub dispatch: DispatchSection,
    /// Remote optimization service settings
    pub remote: RemoteSettings,
    /// Batch scheduler settings
    pub batch: BatchSettings,
    /// Lifecycle log settings
    pub status: StatusSettings,
    /// Data locations
    pub paths: PathSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Which backend evaluates solutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Remote optimization service driven through its CLI
    #[default]
    Remote,
    /// Local batch scheduler (`qsub` style)
    Batch,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Remote => "remote",
            BackendKind::Batch => "batch",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" => Ok(BackendKind::Remote),
            "batch" => Ok(BackendKind::Batch),
            _ => Err("must be one of: remote, batch".to_string()),
        }
    }
}

/// `[dispatch]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSection {
    pub backend: BackendKind,
    /// Seconds between polls of the backend
    pub poll_interval_secs: u64,
    /// Milliseconds between checks while waiting for the previous cycle
    pub idle_check_interval_ms: u64,
    /// Seconds to wait for the previous cycle, 0 waits forever
    pub idle_timeout_secs: u64,
    /// Seconds the setup guard is held before submitting
    pub setup_hold_secs: u64,
}

/// `[remote]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub match_id: Option<String>,
    pub user_name: Option<String>,
    /// Template submitting one solution
    pub send_command: String,
    /// Template listing recent solutions with their evaluations
    pub get_command: String,
    /// Template listing the user's full history for a match
    pub list_command: String,
    /// Maximum number of solutions fetched by `history`
    pub history_limit: usize,
}

/// `[batch]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub family: String,
    pub model: Option<String>,
    /// Job script template, required for the batch backend
    pub script_template: Option<PathBuf>,
    pub submit_command: String,
    /// Directory for job scripts and output files; `<data_dir>/work` if unset
    pub work_dir: Option<PathBuf>,
}

/// `[status]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSettings {
    /// Maximum rows kept in the lifecycle log
    pub limit: usize,
}

/// `[paths]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSettings {
    /// Root of every data file evalrelay writes
    pub data_dir: PathBuf,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}

/// File locations derived from `[paths] data_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub results_dir: PathBuf,
    pub status_file: PathBuf,
    pub unresolved_file: PathBuf,
    pub queue_file: PathBuf,
    pub history_dir: PathBuf,
    pub lock_file: PathBuf,
    pub work_dir: PathBuf,
}
