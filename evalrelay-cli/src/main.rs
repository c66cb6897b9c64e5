//! evalrelay CLI - Command-line interface
//!
//! This binary provides a command-line interface to the evalrelay library.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use evalrelay::config::{config_file_path, ConfigFile};

use commands::config::ConfigCommands;
use commands::history::HistoryArgs;
use commands::run::RunArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "evalrelay", version)]
#[command(about = "Send candidate solutions to an evaluator and collect the results", long_about = None)]
struct Cli {
    /// Config file (default: ~/.evalrelay/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging, also echoed to stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch the queued solutions and print their results as JSON
    Run {
        /// Solutions to queue first: a JSON list of vectors or a single vector
        #[arg(long)]
        solutions: Option<String>,

        /// Read the solutions to queue from a JSON file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Run the cycle in the background and return immediately
        #[arg(long)]
        no_wait: bool,

        /// Resume collecting evaluations left outstanding by a failed cycle
        #[arg(long)]
        re_receive: bool,
    },

    /// Show recent dispatch cycles
    Status {
        /// Number of rows to show, newest first
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List your solutions of a remote match
    History {
        /// Match to query (default: remote.match_id)
        #[arg(long)]
        match_id: Option<String>,

        /// Merge the listed solutions into history/<OUTPUT>.json
        #[arg(long)]
        output: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        e.exit();
    }
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(config_file_path);

    match cli.command {
        Commands::Config { command } => commands::config::run(command, &config_path),
        Commands::Status { limit } => {
            let config = ConfigFile::load_from(&config_path)?;
            commands::status::run(&config, limit)
        }
        Commands::Run {
            solutions,
            file,
            no_wait,
            re_receive,
        } => {
            let runner = CliRunner::new(&config_path, cli.debug)?;
            commands::run::run(
                &runner,
                RunArgs {
                    solutions,
                    file,
                    no_wait,
                    re_receive,
                },
            )
        }
        Commands::History { match_id, output } => {
            let runner = CliRunner::new(&config_path, cli.debug)?;
            commands::history::run(&runner, HistoryArgs { match_id, output })
        }
    }
}
