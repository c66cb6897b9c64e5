//! History command - list the user's submitted solutions of a match.

use tracing::info;

use evalrelay::backend::ShellRunner;
use evalrelay::history::{HistoryClient, HistoryEntry, HistoryFile};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the history command.
pub struct HistoryArgs {
    /// Match to query; falls back to `[remote] match_id`
    pub match_id: Option<String>,
    /// Merge into `history/<name>.json` when set
    pub output: Option<String>,
}

/// Run the history command.
pub fn run(runner: &CliRunner, args: HistoryArgs) -> Result<(), CliError> {
    runner.log_startup("history");
    let config = runner.config();

    let match_id = args
        .match_id
        .or_else(|| config.remote.match_id.clone())
        .ok_or_else(|| {
            CliError::Config("no match given; pass --match-id or set remote.match_id".to_string())
        })?;
    let user_name = config.remote.user_name.as_deref().ok_or_else(|| {
        CliError::Config("remote.user_name must be set to query history".to_string())
    })?;

    let client = HistoryClient::new(
        &config.remote.list_command,
        user_name,
        config.remote.history_limit,
        ShellRunner,
    );
    let entries = runner.block_on(client.fetch(&match_id))??;
    info!(match_id = %match_id, count = entries.len(), "Fetched solution history");

    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    println!("{} solution(s) in match {}", entries.len(), match_id);

    if let Some(name) = args.output {
        let file = HistoryFile::named(&config.paths().history_dir, &name);
        let added = file.merge(&entries)?;
        println!("Added {} new solution(s) to {}", added, file.path().display());
    }

    Ok(())
}

fn format_entry(entry: &HistoryEntry) -> String {
    let objective = entry
        .objective
        .map(|o| o.to_string())
        .unwrap_or_else(|| "-".to_string());
    let created_at = entry.created_at.as_deref().unwrap_or("-");
    format!("{}  {:>14}  {}", created_at, objective, entry.key())
}
