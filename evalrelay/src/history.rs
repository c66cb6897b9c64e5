//! Solution history from the remote optimization service.
//!
//! The history command lists every solution the configured user submitted to
//! a match and can merge them into a local JSON file,
//! `history/<name>.json`, shaped like the result store:
//!
//! ```json
//! [ { "[1,2]": { "objective": 0.5, "date": "2024-05-01T12:00:00Z", "info": null } } ]
//! ```
//!
//! Merging only adds solutions whose key is not in the file yet.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{BackendError, CommandRunner, CommandTemplate, ShellRunner};
use crate::solution::Solution;
use crate::store::{read_json, write_json, StoreError};

/// Default command listing a user's solutions of one match.
pub const DEFAULT_LIST_COMMAND: &str = "opt list solutions --limit ${LIMIT} --query \"_and: [{match_id: {_eq: ${ID}}}, {owner: {name: {_eq: ${USERNAME}}}}]\"";

/// Errors fetching or storing history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("unexpected history response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One listed solution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryEntry {
    pub variable: Value,
    #[serde(default)]
    pub objective: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub info: Option<Value>,
}

impl HistoryEntry {
    /// Key of this entry in the history file.
    ///
    /// Numeric vectors use the canonical fingerprint so `[1.0, 2]` and
    /// `[1, 2]` collapse; anything else falls back to its JSON text.
    pub fn key(&self) -> String {
        match serde_json::from_value::<Solution>(self.variable.clone()) {
            Ok(solution) => solution.fingerprint().as_str().to_string(),
            Err(_) => self.variable.to_string(),
        }
    }

    fn body(&self) -> Value {
        json!({
            "objective": self.objective,
            "date": self.created_at,
            "info": self.info,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    solutions: Vec<HistoryEntry>,
}

/// Queries solution history through the list command.
#[derive(Debug)]
pub struct HistoryClient<R: CommandRunner = ShellRunner> {
    runner: R,
    template: CommandTemplate,
}

impl<R: CommandRunner> HistoryClient<R> {
    /// Creates a client for `user_name`, listing at most `limit` solutions.
    pub fn new(list_command: &str, user_name: &str, limit: usize, runner: R) -> Self {
        let limit = limit.to_string();
        let template = CommandTemplate::new(list_command)
            .bind(&[("USERNAME", user_name), ("LIMIT", &limit)]);
        Self { runner, template }
    }

    /// Lists the user's solutions for `match_id`.
    pub async fn fetch(&self, match_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        let command = self.template.render(&[("ID", match_id)]);
        let stdout = self.runner.run(&command, None).await?;
        let response: ListResponse = serde_json::from_str(stdout.trim())
            .map_err(|e| HistoryError::InvalidResponse(e.to_string()))?;
        debug!(match_id, count = response.solutions.len(), "Fetched history");
        Ok(response.solutions)
    }
}

/// A local history file.
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// History file `<name>.json` inside `dir`.
    pub fn named(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(format!("{}.json", name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends entries whose key is not yet in the file. Returns how many
    /// were added.
    pub fn merge(&self, entries: &[HistoryEntry]) -> Result<usize, HistoryError> {
        let mut existing: Vec<Map<String, Value>> = read_json(&self.path)?.unwrap_or_default();
        let mut keys: HashSet<String> = existing
            .iter()
            .filter_map(|entry| entry.keys().next().cloned())
            .collect();

        let mut added = 0;
        for entry in entries {
            let key = entry.key();
            if keys.insert(key.clone()) {
                let mut object = Map::new();
                object.insert(key, entry.body());
                existing.push(object);
                added += 1;
            }
        }

        write_json(&self.path, &existing)?;
        info!(path = %self.path.display(), added, total = existing.len(), "Merged history");
        Ok(added)
    }
}
