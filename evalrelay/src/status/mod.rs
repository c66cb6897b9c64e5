//! Lifecycle log shared by every process dispatching work.
//!
//! The log is a small CSV file of `timestamp,recipient,state` rows. Each
//! dispatch cycle owns exactly one row: it appends the row when it starts
//! waiting and rewrites it in place as the cycle progresses. A cycle may only
//! start sending once the most recent earlier row of the same recipient is in
//! a terminal state, which serializes cycles per recipient across processes.
//!
//! The file behaves as a ring buffer bounded by `max_rows`. Because other
//! processes may trim the head of the file while a cycle is running, a
//! [`StatusCursor`] tags its row with an owner token (a fourth column) and
//! relocates it by walking backward from the last known index. Rows without
//! the fourth column are still read.

mod state;

pub use state::DispatchState;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

use crate::recipient::Recipient;
use crate::store::write_atomic;
use crate::time::log_timestamp;

/// Smallest usable ring size: one earlier row plus the cycle's own row.
pub const MIN_STATUS_ROWS: usize = 2;

/// Errors reading or writing the lifecycle log.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("I/O error on status log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed status row {line} in {path}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("status log must keep at least 2 rows, got {0}")]
    InvalidLimit(usize),

    #[error("no status row has been written for {0} yet")]
    NotAppended(String),

    #[error("status row for {recipient} is no longer in the log")]
    RowLost { recipient: String },
}

/// One row of the lifecycle log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub timestamp: String,
    pub recipient: String,
    /// Raw label as stored; see [`StatusRow::state`].
    pub label: String,
    /// Token of the cursor owning this row, empty for three-column rows.
    pub owner: String,
}

impl StatusRow {
    fn new(cursor: &StatusCursor, state: DispatchState) -> Self {
        Self {
            timestamp: log_timestamp(),
            recipient: cursor.recipient.as_str().to_string(),
            label: state.label().to_string(),
            owner: cursor.owner.clone(),
        }
    }

    /// Parsed state, `None` for labels this version does not know.
    pub fn state(&self) -> Option<DispatchState> {
        DispatchState::from_label(&self.label)
    }

    /// Returns true if this row ends its cycle. Unknown labels never do.
    pub fn is_terminal(&self) -> bool {
        self.state().is_some_and(DispatchState::is_terminal)
    }

    fn parse(text: &str) -> Result<Self, String> {
        let fields: Vec<&str> = text.split(',').map(unquote).collect();
        match fields.as_slice() {
            [timestamp, recipient, label] => Ok(Self {
                timestamp: timestamp.to_string(),
                recipient: recipient.to_string(),
                label: label.to_string(),
                owner: String::new(),
            }),
            [timestamp, recipient, label, owner] => Ok(Self {
                timestamp: timestamp.to_string(),
                recipient: recipient.to_string(),
                label: label.to_string(),
                owner: owner.to_string(),
            }),
            _ => Err(format!("expected 3 or 4 fields, found {}", fields.len())),
        }
    }

    fn to_line(&self) -> String {
        if self.owner.is_empty() {
            format!("{},{},{}", self.timestamp, self.recipient, self.label)
        } else {
            format!(
                "{},{},{},{}",
                self.timestamp, self.recipient, self.label, self.owner
            )
        }
    }
}

/// Token unique to one cursor: process id, open time and a per-process
/// sequence number.
fn owner_token() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}-{}",
        std::process::id(),
        chrono::Local::now().timestamp_micros(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

/// A process's handle on its own row of the log.
#[derive(Debug, Clone)]
pub struct StatusCursor {
    recipient: Recipient,
    owner: String,
    index: usize,
    written: Option<StatusRow>,
}

impl StatusCursor {
    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    /// Token written in this cursor's row.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Index the cursor last observed its row at.
    pub fn index(&self) -> usize {
        self.index
    }

    /// State this cursor last wrote, if any.
    pub fn last_state(&self) -> Option<DispatchState> {
        self.written.as_ref().and_then(StatusRow::state)
    }
}

/// The lifecycle log file.
#[derive(Debug, Clone)]
pub struct StatusLog {
    path: PathBuf,
    max_rows: usize,
}

impl StatusLog {
    /// Opens the log at `path`, keeping at most `max_rows` rows.
    pub fn new(path: impl Into<PathBuf>, max_rows: usize) -> Result<Self, StatusError> {
        if max_rows < MIN_STATUS_ROWS {
            return Err(StatusError::InvalidLimit(max_rows));
        }
        Ok(Self {
            path: path.into(),
            max_rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Creates a cursor positioned where this process's row will be appended.
    pub fn open(&self, recipient: &Recipient) -> Result<StatusCursor, StatusError> {
        let index = self.rows()?.len();
        Ok(StatusCursor {
            recipient: recipient.clone(),
            owner: owner_token(),
            index,
            written: None,
        })
    }

    /// Appends a row for the cursor, trimming the oldest rows when full.
    pub fn append(
        &self,
        cursor: &mut StatusCursor,
        state: DispatchState,
    ) -> Result<(), StatusError> {
        let mut rows = self.rows()?;
        if rows.len() >= self.max_rows {
            let keep = self.max_rows - 1;
            let dropped = rows.len() - keep;
            rows.drain(..dropped);
            debug!(dropped, keep, "Trimmed lifecycle log");
        }

        let row = StatusRow::new(cursor, state);
        rows.push(row.clone());
        self.write_rows(&rows)?;

        cursor.index = rows.len() - 1;
        cursor.written = Some(row);
        trace!(recipient = %cursor.recipient, state = %state, index = cursor.index, "Appended status row");
        Ok(())
    }

    /// Rewrites the cursor's row with a new state and timestamp.
    pub fn set_state(
        &self,
        cursor: &mut StatusCursor,
        state: DispatchState,
    ) -> Result<(), StatusError> {
        let mut rows = self.rows()?;
        let index = self.locate(&rows, cursor)?;

        let row = StatusRow::new(cursor, state);
        rows[index] = row.clone();
        self.write_rows(&rows)?;

        cursor.index = index;
        cursor.written = Some(row);
        trace!(recipient = %cursor.recipient, state = %state, index, "Updated status row");
        Ok(())
    }

    /// Reads back the state stored in the cursor's row.
    pub fn current_state(&self, cursor: &StatusCursor) -> Result<Option<DispatchState>, StatusError> {
        let rows = self.rows()?;
        match self.locate(&rows, cursor) {
            Ok(index) => Ok(rows[index].state()),
            Err(StatusError::NotAppended(_)) | Err(StatusError::RowLost { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns true if the most recent row of `recipient` before the cursor's
    /// row is terminal, or if there is none.
    pub fn is_idle(&self, recipient: &Recipient, before: &StatusCursor) -> Result<bool, StatusError> {
        let rows = self.rows()?;
        let end = match self.locate(&rows, before) {
            Ok(index) => index,
            Err(StatusError::NotAppended(_)) => before.index.min(rows.len()),
            Err(e) => return Err(e),
        };

        let previous = rows[..end]
            .iter()
            .rev()
            .find(|row| row.recipient == recipient.as_str());
        Ok(previous.map_or(true, StatusRow::is_terminal))
    }

    /// All rows, oldest first. A missing file has no rows.
    pub fn rows(&self) -> Result<Vec<StatusRow>, StatusError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StatusError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        content
            .lines()
            .enumerate()
            .map(|(n, line)| (n, line.trim_end_matches('\r')))
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                StatusRow::parse(line).map_err(|reason| StatusError::Corrupt {
                    path: self.path.clone(),
                    line: n + 1,
                    reason,
                })
            })
            .collect()
    }

    /// The newest `n` rows, newest first.
    pub fn tail(&self, n: usize) -> Result<Vec<StatusRow>, StatusError> {
        let rows = self.rows()?;
        Ok(rows.into_iter().rev().take(n).collect())
    }

    fn locate(&self, rows: &[StatusRow], cursor: &StatusCursor) -> Result<usize, StatusError> {
        if cursor.written.is_none() {
            return Err(StatusError::NotAppended(cursor.recipient.to_string()));
        }
        if rows.is_empty() {
            return Err(StatusError::RowLost {
                recipient: cursor.recipient.to_string(),
            });
        }

        let start = cursor.index.min(rows.len() - 1);
        (0..=start)
            .rev()
            .find(|&i| {
                rows[i].owner == cursor.owner && rows[i].recipient == cursor.recipient.as_str()
            })
            .ok_or_else(|| StatusError::RowLost {
                recipient: cursor.recipient.to_string(),
            })
    }

    fn write_rows(&self, rows: &[StatusRow]) -> Result<(), StatusError> {
        let mut body = String::new();
        for row in rows {
            body.push_str(&row.to_line());
            body.push('\n');
        }
        write_atomic(&self.path, body.as_bytes()).map_err(|source| StatusError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
