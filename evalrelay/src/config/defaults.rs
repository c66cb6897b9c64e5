//! Default values for configuration settings and the `ConfigFile::default()`
//! implementation.

use super::file::config_directory;
use super::settings::*;
use crate::history::DEFAULT_LIST_COMMAND;

/// Default seconds between polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default milliseconds between idle checks.
pub const DEFAULT_IDLE_CHECK_INTERVAL_MS: u64 = 1000;

/// Default idle timeout, 0 meaning unbounded.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;

/// Default seconds the setup guard is held.
pub const DEFAULT_SETUP_HOLD_SECS: u64 = 10;

/// Default command submitting one solution to the remote service.
pub const DEFAULT_SEND_COMMAND: &str = "opt submit --match ${ID} '${SOLUTION}'";

/// Default command listing the user's most recent solutions.
pub const DEFAULT_GET_COMMAND: &str = "opt list solutions --limit ${SENDLISTSIZE} --query \"_and: [{match_id: {_eq: ${ID}}}, {owner: {name: {_eq: ${USERNAME}}}}]\"";

/// Default number of solutions fetched by `history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Default batch job family.
pub const DEFAULT_BATCH_FAMILY: &str = "default";

/// Default batch submission command.
pub const DEFAULT_SUBMIT_COMMAND: &str = "qsub ${SCRIPT}";

/// Default maximum rows of the lifecycle log.
pub const DEFAULT_STATUS_LIMIT: usize = 1000;

/// Default log file name inside the config directory.
pub const DEFAULT_LOG_FILE: &str = "evalrelay.log";

impl Default for ConfigFile {
    fn default() -> Self {
        let dir = config_directory();
        Self {
            dispatch: DispatchSection {
                backend: BackendKind::default(),
                poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
                idle_check_interval_ms: DEFAULT_IDLE_CHECK_INTERVAL_MS,
                idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
                setup_hold_secs: DEFAULT_SETUP_HOLD_SECS,
            },
            remote: RemoteSettings {
                match_id: None,
                user_name: None,
                send_command: DEFAULT_SEND_COMMAND.to_string(),
                get_command: DEFAULT_GET_COMMAND.to_string(),
                list_command: DEFAULT_LIST_COMMAND.to_string(),
                history_limit: DEFAULT_HISTORY_LIMIT,
            },
            batch: BatchSettings {
                family: DEFAULT_BATCH_FAMILY.to_string(),
                model: None,
                script_template: None,
                submit_command: DEFAULT_SUBMIT_COMMAND.to_string(),
                work_dir: None,
            },
            status: StatusSettings {
                limit: DEFAULT_STATUS_LIMIT,
            },
            paths: PathSettings {
                data_dir: dir.clone(),
            },
            logging: LoggingSettings {
                file: dir.join(DEFAULT_LOG_FILE),
            },
        }
    }
}
