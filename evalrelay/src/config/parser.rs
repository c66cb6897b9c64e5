//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::{BackendKind, ConfigFile};

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [dispatch] section
    if let Some(section) = ini.section(Some("dispatch")) {
        if let Some(v) = section.get("backend") {
            config.dispatch.backend =
                v.parse::<BackendKind>()
                    .map_err(|reason| ConfigFileError::InvalidValue {
                        section: "dispatch".to_string(),
                        key: "backend".to_string(),
                        value: v.to_string(),
                        reason,
                    })?;
        }
        if let Some(v) = section.get("poll_interval_secs") {
            config.dispatch.poll_interval_secs = parse_number("dispatch", "poll_interval_secs", v)?;
        }
        if let Some(v) = section.get("idle_check_interval_ms") {
            let ms: u64 = parse_number("dispatch", "idle_check_interval_ms", v)?;
            if ms == 0 {
                return Err(ConfigFileError::InvalidValue {
                    section: "dispatch".to_string(),
                    key: "idle_check_interval_ms".to_string(),
                    value: v.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
            config.dispatch.idle_check_interval_ms = ms;
        }
        if let Some(v) = section.get("idle_timeout_secs") {
            config.dispatch.idle_timeout_secs = parse_number("dispatch", "idle_timeout_secs", v)?;
        }
        if let Some(v) = section.get("setup_hold_secs") {
            config.dispatch.setup_hold_secs = parse_number("dispatch", "setup_hold_secs", v)?;
        }
    }

    // [remote] section
    if let Some(section) = ini.section(Some("remote")) {
        if let Some(v) = section.get("match_id") {
            config.remote.match_id = optional_string(v);
        }
        if let Some(v) = section.get("user_name") {
            config.remote.user_name = optional_string(v);
        }
        if let Some(v) = section.get("send_command") {
            if let Some(v) = optional_string(v) {
                config.remote.send_command = v;
            }
        }
        if let Some(v) = section.get("get_command") {
            if let Some(v) = optional_string(v) {
                config.remote.get_command = v;
            }
        }
        if let Some(v) = section.get("list_command") {
            if let Some(v) = optional_string(v) {
                config.remote.list_command = v;
            }
        }
        if let Some(v) = section.get("history_limit") {
            config.remote.history_limit = parse_number("remote", "history_limit", v)?;
        }
    }

    // [batch] section
    if let Some(section) = ini.section(Some("batch")) {
        if let Some(v) = section.get("family") {
            if let Some(v) = optional_string(v) {
                config.batch.family = v;
            }
        }
        if let Some(v) = section.get("model") {
            config.batch.model = optional_string(v);
        }
        if let Some(v) = section.get("script_template") {
            config.batch.script_template = optional_path(v);
        }
        if let Some(v) = section.get("submit_command") {
            if let Some(v) = optional_string(v) {
                config.batch.submit_command = v;
            }
        }
        if let Some(v) = section.get("work_dir") {
            config.batch.work_dir = optional_path(v);
        }
    }

    // [status] section
    if let Some(section) = ini.section(Some("status")) {
        if let Some(v) = section.get("limit") {
            config.status.limit = parse_number("status", "limit", v)?;
        }
    }

    // [paths] section
    if let Some(section) = ini.section(Some("paths")) {
        if let Some(v) = section.get("data_dir") {
            if let Some(path) = optional_path(v) {
                config.paths.data_dir = path;
            }
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            if let Some(path) = optional_path(v) {
                config.logging.file = path;
            }
        }
    }

    config.validate()?;
    Ok(config)
}

/// Parse a number, reporting the offending key on failure.
pub(super) fn parse_number<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be a non-negative integer".to_string(),
        })
}

/// Trimmed value, or `None` when blank.
pub(super) fn optional_string(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// Expanded path, or `None` when blank.
pub(super) fn optional_path(value: &str) -> Option<PathBuf> {
    optional_string(value).map(|v| expand_tilde(&v))
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::*;
    use tempfile::TempDir;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sections
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_dispatch_section() {
        let config = parse(
            "[dispatch]\nbackend = Batch\npoll_interval_secs = 5\n\
             idle_check_interval_ms = 200\nidle_timeout_secs = 600\nsetup_hold_secs = 0\n",
        )
        .unwrap();

        assert_eq!(config.dispatch.backend, BackendKind::Batch);
        assert_eq!(config.dispatch.poll_interval_secs, 5);
        assert_eq!(config.dispatch.idle_check_interval_ms, 200);
        assert_eq!(config.dispatch.idle_timeout_secs, 600);
        assert_eq!(config.dispatch.setup_hold_secs, 0);
    }

    #[test]
    fn test_remote_section() {
        let config = parse(
            "[remote]\nmatch_id = 12\nuser_name = alice\n\
             send_command = my-send ${ID}\nget_command =\nhistory_limit = 20\n",
        )
        .unwrap();

        assert_eq!(config.remote.match_id.as_deref(), Some("12"));
        assert_eq!(config.remote.user_name.as_deref(), Some("alice"));
        assert_eq!(config.remote.send_command, "my-send ${ID}");
        assert_eq!(config.remote.get_command, DEFAULT_GET_COMMAND);
        assert_eq!(config.remote.history_limit, 20);
    }

    #[test]
    fn test_batch_and_paths_sections() {
        let config = parse(
            "[batch]\nfamily = gpu\nmodel = m1\nscript_template = /jobs/t.sh\n\
             submit_command = sbatch ${SCRIPT}\nwork_dir =\n\
             [paths]\ndata_dir = /data/relay\n\
             [logging]\nfile = /var/log/relay.log\n",
        )
        .unwrap();

        assert_eq!(config.batch.family, "gpu");
        assert_eq!(config.batch.model.as_deref(), Some("m1"));
        assert_eq!(config.batch.script_template, Some(PathBuf::from("/jobs/t.sh")));
        assert_eq!(config.batch.submit_command, "sbatch ${SCRIPT}");
        assert!(config.batch.work_dir.is_none());
        assert_eq!(config.paths.data_dir, PathBuf::from("/data/relay"));
        assert_eq!(config.logging.file, PathBuf::from("/var/log/relay.log"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invalid values
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_unknown_backend_rejected() {
        let err = parse("[dispatch]\nbackend = carrier-pigeon\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "backend"
        ));
    }

    #[test]
    fn test_non_numeric_interval_rejected() {
        let err = parse("[dispatch]\npoll_interval_secs = soon\n").unwrap_err();
        assert!(err.to_string().contains("dispatch.poll_interval_secs"));
    }

    #[test]
    fn test_zero_idle_check_rejected() {
        assert!(parse("[dispatch]\nidle_check_interval_ms = 0\n").is_err());
    }

    #[test]
    fn test_status_limit_minimum() {
        assert!(parse("[status]\nlimit = 1\n").is_err());
        assert_eq!(parse("[status]\nlimit = 2\n").unwrap().status.limit, 2);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Round trip through the writer
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_saved_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");

        let mut config = ConfigFile::default();
        config.dispatch.backend = BackendKind::Batch;
        config.remote.match_id = Some("3".to_string());
        config.batch.model = Some("large".to_string());
        config.batch.script_template = Some(temp_dir.path().join("job.sh"));
        config.status.limit = 50;
        config.paths.data_dir = temp_dir.path().join("data");
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/relay"), home.join("relay"));
        assert_eq!(expand_tilde("/abs/relay"), PathBuf::from("/abs/relay"));
    }
}
