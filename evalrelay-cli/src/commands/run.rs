//! Run command - dispatch the pending queue and print the results.
//!
//! Inputs given with `--solutions` or `--file` replace the pending queue
//! before the cycle starts. With `--no-wait` the cycle runs in a detached
//! copy of this binary and the command returns immediately.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::info;

use evalrelay::store::{PendingQueue, ResultRecord, UnresolvedFile};

use super::common::{build_engine, parse_input};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the run command.
pub struct RunArgs {
    pub solutions: Option<String>,
    pub file: Option<PathBuf>,
    pub no_wait: bool,
    pub re_receive: bool,
}

/// Run the run command.
pub fn run(runner: &CliRunner, args: RunArgs) -> Result<(), CliError> {
    runner.log_startup("run");
    let config = runner.config();
    let paths = config.paths();
    let queue = PendingQueue::new(&paths.queue_file);

    if let Some(text) = input_text(&args)? {
        let items = parse_input(&text)?;
        queue.set(&items)?;
        info!(queued = items.len(), path = %queue.path().display(), "Queued solutions");
    }

    if args.no_wait {
        return spawn_detached(runner, args.re_receive);
    }

    let unresolved = UnresolvedFile::new(&paths.unresolved_file);
    if !args.re_receive && unresolved.is_pending() {
        eprintln!(
            "Note: evaluations from an earlier cycle are still outstanding ({}).",
            unresolved.path().display()
        );
        eprintln!("      Collect them with: evalrelay run --re-receive");
    }

    let token = runner.interrupt_token()?;
    let engine = build_engine(config, token)?;

    let records = if args.re_receive {
        runner.block_on(engine.re_receive())??
    } else {
        let items = queue.load()?;
        if items.is_empty() {
            return Err(CliError::Input(format!(
                "no solutions queued in {}; pass --solutions or --file",
                queue.path().display()
            )));
        }
        runner.block_on(engine.run_cycle(&items))??
    };

    print_records(&records)
}

fn input_text(args: &RunArgs) -> Result<Option<String>, CliError> {
    match (&args.solutions, &args.file) {
        (Some(_), Some(_)) => Err(CliError::Input(
            "--solutions and --file cannot be combined".to_string(),
        )),
        (Some(text), None) => Ok(Some(text.clone())),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(Some)
            .map_err(|e| CliError::Input(format!("cannot read {}: {}", path.display(), e))),
        (None, None) => Ok(None),
    }
}

/// Start `evalrelay run` on the queue in the background.
fn spawn_detached(runner: &CliRunner, re_receive: bool) -> Result<(), CliError> {
    let exe = std::env::current_exe().map_err(CliError::Runtime)?;
    let mut command = Command::new(exe);
    command
        .arg("--config")
        .arg(runner.config_path())
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if runner.debug() {
        command.arg("--debug");
    }
    if re_receive {
        command.arg("--re-receive");
    }

    let child = command.spawn().map_err(CliError::Runtime)?;
    info!(pid = child.id(), "Started background cycle");
    println!("Started background cycle (pid {})", child.id());
    Ok(())
}

fn print_records(records: &[ResultRecord]) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| CliError::Input(format!("cannot render results: {}", e)))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(solutions: Option<&str>, file: Option<PathBuf>) -> RunArgs {
        RunArgs {
            solutions: solutions.map(str::to_string),
            file,
            no_wait: false,
            re_receive: false,
        }
    }

    #[test]
    fn test_input_from_flag() {
        let text = input_text(&args(Some("[1,2]"), None)).unwrap();
        assert_eq!(text.as_deref(), Some("[1,2]"));
    }

    #[test]
    fn test_input_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.json");
        std::fs::write(&path, "[[1],[2]]").unwrap();

        let text = input_text(&args(None, Some(path))).unwrap();
        assert_eq!(text.as_deref(), Some("[[1],[2]]"));
    }

    #[test]
    fn test_input_conflicts_and_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(input_text(&args(Some("[1]"), Some(dir.path().join("a")))).is_err());
        assert!(input_text(&args(None, Some(dir.path().join("missing.json")))).is_err());
        assert!(input_text(&args(None, None)).unwrap().is_none());
    }
}
