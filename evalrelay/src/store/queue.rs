//! Pending-work input file.
//!
//! The queue holds the candidate inputs for the next cycle as
//! `{ "value": [[...], [...]] }`. Other keys in the document are preserved
//! when the value list is replaced.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use super::{read_json, write_json, StoreError};
use crate::solution::Solution;

/// Key holding the solution list.
const VALUE_KEY: &str = "value";

/// Parses solutions from JSON.
///
/// Accepts either a list of vectors or a single flat vector, which is
/// treated as a list of one.
pub fn parse_solutions(value: &Value) -> Result<Vec<Solution>, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: PathBuf::from("<input>"),
        reason,
    };

    let list = value
        .as_array()
        .ok_or_else(|| corrupt(format!("expected a JSON array, got {}", value)))?;
    if list.is_empty() {
        return Ok(Vec::new());
    }

    let contains_list = list.iter().any(Value::is_array);
    let rows: Vec<&Value> = if contains_list {
        list.iter().collect()
    } else {
        vec![value]
    };

    rows.into_iter()
        .map(|row| {
            let values: Vec<f64> = serde_json::from_value(row.clone())
                .map_err(|e| corrupt(format!("{} is not a numeric vector: {}", row, e)))?;
            Ok(Solution::new(values)?)
        })
        .collect()
}

/// The queue of candidate inputs for the next cycle.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    path: PathBuf,
}

impl PendingQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the queued solutions. A missing file is an empty queue.
    pub fn load(&self) -> Result<Vec<Solution>, StoreError> {
        let doc: Map<String, Value> = match read_json(&self.path)? {
            Some(doc) => doc,
            None => return Ok(Vec::new()),
        };
        match doc.get(VALUE_KEY) {
            Some(value) => parse_solutions(value).map_err(|e| match e {
                StoreError::Corrupt { reason, .. } => StoreError::Corrupt {
                    path: self.path.clone(),
                    reason,
                },
                other => other,
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the queued solutions.
    pub fn set(&self, solutions: &[Solution]) -> Result<(), StoreError> {
        let mut doc: Map<String, Value> = read_json(&self.path)?.unwrap_or_default();
        let list = solutions
            .iter()
            .map(|s| serde_json::to_value(s).map_err(|e| StoreError::json(&self.path, e)))
            .collect::<Result<Vec<_>, _>>()?;
        doc.insert(VALUE_KEY.to_string(), Value::Array(list));
        write_json(&self.path, &doc)
    }
}
