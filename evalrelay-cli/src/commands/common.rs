//! Common types and utilities shared across CLI commands.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use evalrelay::backend::Backend;
use evalrelay::config::ConfigFile;
use evalrelay::dispatch::DispatchEngine;
use evalrelay::solution::Solution;
use evalrelay::status::StatusLog;
use evalrelay::store::{parse_solutions, UnresolvedFile};

use crate::error::CliError;

/// Parse solution input given on the command line or in a file.
///
/// Accepts a list of vectors, a single flat vector, or a pending-queue
/// document of the form `{"value": [...]}`.
pub fn parse_input(text: &str) -> Result<Vec<Solution>, CliError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| CliError::Input(format!("not valid JSON: {}", e)))?;
    let list = match value {
        Value::Object(mut doc) => doc
            .remove("value")
            .ok_or_else(|| CliError::Input("object input needs a \"value\" list".to_string()))?,
        other => other,
    };
    parse_solutions(&list).map_err(|e| CliError::Input(e.to_string()))
}

/// Open the lifecycle log configured in `config`.
pub fn status_log(config: &ConfigFile) -> Result<StatusLog, CliError> {
    Ok(StatusLog::new(config.paths().status_file, config.status.limit)?)
}

/// Build the dispatch engine for the configured backend.
pub fn build_engine(
    config: &ConfigFile,
    cancel: CancellationToken,
) -> Result<DispatchEngine<Backend>, CliError> {
    let paths = config.paths();
    let backend = Backend::from_config(config.backend_config()?)?;
    Ok(DispatchEngine::new(
        backend,
        &paths.results_dir,
        status_log(config)?,
        UnresolvedFile::new(&paths.unresolved_file),
        &paths.lock_file,
    )
    .with_settings(config.dispatch_settings())
    .with_cancellation(cancel))
}
