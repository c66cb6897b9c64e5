//! Persistent JSON state shared between process invocations.
//!
//! Every file here is re-read before it is mutated and written back through a
//! temporary file in the same directory followed by a rename, so another
//! process never observes a half-written file.
//!
//! - [`ResultStore`] - fingerprint → result cache, one file per recipient
//! - [`UnresolvedFile`] - side record of handles still outstanding after a
//!   poll failure, consumed by re-receive
//! - [`PendingQueue`] - candidate inputs for the next cycle

mod queue;
mod record;
mod results;
mod unresolved;

pub use queue::{parse_solutions, PendingQueue};
pub use record::{Evaluation, ResultRecord};
pub use results::{Lookup, ResultStore, RESULT_FILE_PREFIX};
pub use unresolved::{UnresolvedEntry, UnresolvedFile, UnresolvedRecord};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::solution::SolutionError;

/// Errors reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid entry in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("length mismatch: {items} items but {evaluations} evaluations")]
    LengthMismatch { items: usize, evaluations: usize },

    #[error(transparent)]
    Solution(#[from] SolutionError),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reads a JSON document, treating a missing or blank file as absent.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

/// Writes a JSON document atomically, creating parent directories as needed.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    write_atomic(path, &body).map_err(|e| StoreError::io(path, e))
}

/// Replaces `path` with `contents` via a temporary file in the same
/// directory and a rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".evalrelay-")
        .suffix(".tmp")
        .tempfile_in(&parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_and_blank_files_read_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        assert!(read_json::<Vec<u32>>(&path).unwrap().is_none());

        std::fs::write(&path, "  \n").unwrap();
        assert!(read_json::<Vec<u32>>(&path).unwrap().is_none());
    }

    #[test]
    fn write_creates_parents_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("data.json");

        write_json(&path, &vec![1, 2, 3]).unwrap();
        assert_eq!(read_json::<Vec<u32>>(&path).unwrap(), Some(vec![1, 2, 3]));

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = read_json::<Vec<u32>>(&path).unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}
