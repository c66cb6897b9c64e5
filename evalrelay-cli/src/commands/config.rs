//! Configuration management CLI commands.
//!
//! Provides `config init`, `config path`, `config list`, `config get` and
//! `config set` for viewing and modifying settings from the command line.

use clap::Subcommand;
use std::path::Path;

use evalrelay::config::{ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Create a config file with default settings
    Init,

    /// Show the configuration file path
    Path,

    /// List all configuration settings
    List,

    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., remote.match_id)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key in format section.key (e.g., remote.match_id)
        key: String,

        /// Value to set
        value: String,
    },
}

/// Run a config subcommand against the config file at `path`.
pub fn run(command: ConfigCommands, path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init => run_init(path),
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::List => run_list(path),
        ConfigCommands::Get { key } => run_get(path, &key),
        ConfigCommands::Set { key, value } => run_set(path, &key, &value),
    }
}

fn run_init(path: &Path) -> Result<(), CliError> {
    if ConfigFile::ensure_exists(path)? {
        println!("Created {}", path.display());
        println!();
        println!("Next steps:");
        println!("  evalrelay config set remote.match_id <id>");
        println!("  evalrelay config set remote.user_name <name>");
    } else {
        println!("Configuration already exists at {}", path.display());
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'evalrelay config list' to see available keys.",
            key
        ))
    })
}

fn run_get(path: &Path, key: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;
    let config = ConfigFile::load_from(path)?;
    let value = config_key.get(&config);

    if value.is_empty() {
        println!("(not set)");
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn run_set(path: &Path, key: &str, value: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;
    let mut config = ConfigFile::load_from(path)?;
    config_key.set(&mut config, value)?;
    config.save_to(path)?;

    println!("Set {} = {}", config_key.name(), value);
    Ok(())
}

fn run_list(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    print!("{}", render_settings(&config));
    Ok(())
}

/// Render every setting grouped by section.
fn render_settings(config: &ConfigFile) -> String {
    let mut out = String::new();
    let mut current_section = "";

    for key in ConfigKey::all() {
        let section = key.section();
        if section != current_section {
            if !current_section.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[{}]\n", section));
            current_section = section;
        }

        let value = key.get(config);
        if value.is_empty() {
            out.push_str(&format!("  {} = (not set)\n", key.key_name()));
        } else {
            out.push_str(&format!("  {} = {}\n", key.key_name(), value));
        }
    }
    out
}
