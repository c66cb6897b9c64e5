//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, the async runtime
//! and Ctrl-C handling shared by the commands that do real work.

use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use evalrelay::config::{ConfigFile, DEFAULT_LOG_FILE};
use evalrelay::logging::{init_logging, LoggingGuard};

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: ConfigFile,
    config_path: PathBuf,
    debug: bool,
}

impl CliRunner {
    /// Load config from `config_path` and initialize logging.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Config file; missing files fall back to defaults
    /// * `debug` - When true, enables debug-level logging regardless of RUST_LOG
    pub fn new(config_path: &Path, debug: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load_from(config_path)?;

        let log_path = &config.logging.file;
        let log_dir = log_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let log_file = log_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());

        let logging_guard = init_logging(&log_dir, &log_file, debug, debug)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
            config_path: config_path.to_path_buf(),
            debug,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Path the configuration was loaded from.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("evalrelay v{}", evalrelay::VERSION);
        info!(config = %self.config_path.display(), "evalrelay CLI: {} command", command);
    }

    /// Token cancelled when the user presses Ctrl-C.
    pub fn interrupt_token(&self) -> Result<CancellationToken, CliError> {
        let token = CancellationToken::new();
        let handler_token = token.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupt received, stopping");
            handler_token.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
        Ok(token)
    }

    /// Run a future to completion on a single-threaded runtime.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, CliError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)?;
        Ok(runtime.block_on(future))
    }
}
