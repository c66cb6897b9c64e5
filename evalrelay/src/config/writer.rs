//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let match_id = config.remote.match_id.as_deref().unwrap_or("");
    let user_name = config.remote.user_name.as_deref().unwrap_or("");
    let model = config.batch.model.as_deref().unwrap_or("");
    let script_template = config
        .batch
        .script_template
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();
    let work_dir = config
        .batch
        .work_dir
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();

    format!(
        r#"[dispatch]
; Backend evaluating solutions:
;   remote - remote optimization service, driven through its CLI
;   batch  - local qsub-style batch scheduler
backend = {}
; Seconds between polls for evaluations (default: 60)
poll_interval_secs = {}
; Milliseconds between checks while an earlier cycle is still running (default: 1000)
idle_check_interval_ms = {}
; Give up waiting for an earlier cycle after this many seconds (0 = wait forever)
idle_timeout_secs = {}
; Seconds the setup lock is held before submitting (default: 10)
setup_hold_secs = {}

[remote]
; Match the solutions are submitted to
match_id = {}
; Account name whose solutions are polled
user_name = {}
; Command templates. Variables use $NAME or ${{NAME}}; $$ is a literal dollar.
;   send_command: ID, SOLUTION
;   get_command:  ID, USERNAME, SENDLISTSIZE
;   list_command: ID, USERNAME, LIMIT
send_command = {}
get_command = {}
list_command = {}
; Maximum number of solutions fetched by `evalrelay history` (default: 100)
history_limit = {}

[batch]
; Job family, part of the result file name
family = {}
; Optional model, substituted as MODEL in the script template
model = {}
; Job script template; SOLUTION is substituted with the solution vector
script_template = {}
; Submit command, run inside work_dir; SCRIPT is the script file name
submit_command = {}
; Directory for job scripts and their output (default: <data_dir>/work)
work_dir = {}

[status]
; Maximum rows kept in status.csv (minimum: 2)
limit = {}

[paths]
; Results, status log, queue and history live here
data_dir = {}

[logging]
; Log file path
file = {}
"#,
        config.dispatch.backend,
        config.dispatch.poll_interval_secs,
        config.dispatch.idle_check_interval_ms,
        config.dispatch.idle_timeout_secs,
        config.dispatch.setup_hold_secs,
        match_id,
        user_name,
        config.remote.send_command,
        config.remote.get_command,
        config.remote.list_command,
        config.remote.history_limit,
        config.batch.family,
        model,
        script_template,
        config.batch.submit_command,
        work_dir,
        config.status.limit,
        path_to_string(&config.paths.data_dir),
        path_to_string(&config.logging.file),
    )
}

/// Render a path with the home directory abbreviated to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
