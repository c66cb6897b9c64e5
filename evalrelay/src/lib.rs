//! evalrelay - Solution evaluation relay
//!
//! Submits candidate solutions of an optimization run to an external
//! evaluator, either a remote optimization service or a local batch
//! scheduler, and collects their evaluations. Results are cached per
//! evaluator so a solution is never evaluated twice, and concurrent
//! invocations coordinate through a shared lifecycle log so that only one
//! cycle per evaluator is in flight at a time.
//!
//! # High-Level API
//!
//! ```ignore
//! use evalrelay::backend::Backend;
//! use evalrelay::config::ConfigFile;
//! use evalrelay::dispatch::DispatchEngine;
//! use evalrelay::status::StatusLog;
//! use evalrelay::store::UnresolvedFile;
//!
//! let config = ConfigFile::load()?;
//! let paths = config.paths();
//! let backend = Backend::from_config(config.backend_config()?)?;
//! let engine = DispatchEngine::new(
//!     backend,
//!     &paths.results_dir,
//!     StatusLog::new(&paths.status_file, config.status.limit)?,
//!     UnresolvedFile::new(&paths.unresolved_file),
//!     &paths.lock_file,
//! )
//! .with_settings(config.dispatch_settings());
//!
//! let records = engine.run_cycle(&solutions).await?;
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod guard;
pub mod history;
pub mod logging;
pub mod recipient;
pub mod solution;
pub mod status;
pub mod store;
pub mod time;

/// Version of the evalrelay library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
