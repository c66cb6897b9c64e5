//! Status command - show recent dispatch cycles from the lifecycle log.

use evalrelay::config::ConfigFile;
use evalrelay::status::StatusRow;

use super::common::status_log;
use crate::error::CliError;

/// Print the newest `limit` rows of the lifecycle log.
pub fn run(config: &ConfigFile, limit: usize) -> Result<(), CliError> {
    let log = status_log(config)?;
    let rows = log.tail(limit)?;

    if rows.is_empty() {
        println!("No dispatch cycles recorded in {}", log.path().display());
        return Ok(());
    }

    print!("{}", render_table(&rows));
    Ok(())
}

/// Render rows as an aligned table, one line per row.
fn render_table(rows: &[StatusRow]) -> String {
    let recipient_width = rows
        .iter()
        .map(|row| row.recipient.len())
        .chain(std::iter::once("RECIPIENT".len()))
        .max()
        .unwrap_or(0);
    let timestamp_width = rows
        .iter()
        .map(|row| row.timestamp.len())
        .chain(std::iter::once("TIME".len()))
        .max()
        .unwrap_or(0);

    let mut out = format!(
        "{:<tw$}  {:<rw$}  STATE\n",
        "TIME",
        "RECIPIENT",
        tw = timestamp_width,
        rw = recipient_width
    );
    for row in rows {
        let marker = if row.is_terminal() { "" } else { "  (running)" };
        out.push_str(&format!(
            "{:<tw$}  {:<rw$}  {}{}\n",
            row.timestamp,
            row.recipient,
            row.label,
            marker,
            tw = timestamp_width,
            rw = recipient_width
        ));
    }
    out
}
