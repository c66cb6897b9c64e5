//! Configuration for evalrelay.
//!
//! Settings are read from an INI file, `~/.evalrelay/config.ini` unless
//! another path is given, starting from defaults and overlaying the keys
//! present in the file.
//!
//! # Example
//!
//! ```
//! use evalrelay::config::{BackendKind, ConfigFile};
//!
//! let config = ConfigFile::default();
//! assert_eq!(config.dispatch.backend, BackendKind::Remote);
//! assert!(config.paths().status_file.ends_with("status.csv"));
//! ```

mod defaults;
mod file;
mod keys;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use defaults::*;
pub use keys::{ConfigKey, ConfigKeyError};
pub use settings::{
    BackendKind, BatchSettings, ConfigFile, DataPaths, DispatchSection, LoggingSettings,
    PathSettings, RemoteSettings, StatusSettings,
};
