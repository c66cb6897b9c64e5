//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (init, path, list, get, set)
//! - [`history`] - Solution history of a remote match
//! - [`run`] - Main command (dispatch the pending queue)
//! - [`status`] - Recent dispatch cycles from the lifecycle log

pub mod common;
pub mod config;
pub mod history;
pub mod run;
pub mod status;
