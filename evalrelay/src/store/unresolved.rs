//! Side record of evaluations still outstanding after a poll failure.
//!
//! When polling fails irrecoverably the dispatch engine writes the handles it
//! was waiting for, keyed by the result store they belong to:
//!
//! ```json
//! { "/home/me/.evalrelay/results/resultFile_opt_7.json": [
//!     { "id": 1041, "value": [1.0, 2.0] }
//! ] }
//! ```
//!
//! A later re-receive run reads it back and resumes polling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{read_json, write_json, StoreError};
use crate::backend::JobHandle;
use crate::solution::Solution;

/// One outstanding submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedEntry {
    pub id: JobHandle,
    pub value: Solution,
}

/// Outstanding submissions for one result store.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedRecord {
    pub store_path: PathBuf,
    pub entries: Vec<UnresolvedEntry>,
}

impl UnresolvedRecord {
    /// Pairs submitted items with their handles.
    pub fn new(store_path: impl Into<PathBuf>, items: &[Solution], handles: &[JobHandle]) -> Self {
        let entries = handles
            .iter()
            .zip(items)
            .map(|(id, value)| UnresolvedEntry {
                id: id.clone(),
                value: value.clone(),
            })
            .collect();
        Self {
            store_path: store_path.into(),
            entries,
        }
    }

    /// Submitted items in record order.
    pub fn items(&self) -> Vec<Solution> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    /// Handles in record order.
    pub fn handles(&self) -> Vec<JobHandle> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }
}

/// File holding the [`UnresolvedRecord`].
#[derive(Debug, Clone)]
pub struct UnresolvedFile {
    path: PathBuf,
}

impl UnresolvedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if a non-empty side record is waiting to be re-received.
    pub fn is_pending(&self) -> bool {
        matches!(self.load(), Ok(Some(_)))
    }

    /// Persists the record, replacing any previous one.
    pub fn save(&self, record: &UnresolvedRecord) -> Result<(), StoreError> {
        let mut doc: BTreeMap<String, &[UnresolvedEntry]> = BTreeMap::new();
        doc.insert(
            record.store_path.to_string_lossy().into_owned(),
            &record.entries,
        );
        write_json(&self.path, &doc)
    }

    /// Loads the record. A missing or blank file yields `None`.
    pub fn load(&self) -> Result<Option<UnresolvedRecord>, StoreError> {
        let doc: BTreeMap<String, Vec<UnresolvedEntry>> = match read_json(&self.path)? {
            Some(doc) => doc,
            None => return Ok(None),
        };
        let mut iter = doc.into_iter();
        let record = match iter.next() {
            Some((store_path, entries)) => UnresolvedRecord {
                store_path: PathBuf::from(store_path),
                entries,
            },
            None => return Ok(None),
        };
        if iter.next().is_some() {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: "expected exactly one result store entry".to_string(),
            });
        }
        if record.entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Deletes the side record once everything has been received.
    pub fn remove(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BatchJob;
    use serde_json::json;
    use tempfile::TempDir;

    fn sol(values: &[f64]) -> Solution {
        Solution::new(values.to_vec()).unwrap()
    }

    #[test]
    fn remote_handles_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = UnresolvedFile::new(dir.path().join("errors").join("UnReceiveData.json"));
        let record = UnresolvedRecord::new(
            "/data/resultFile_opt_1.json",
            &[sol(&[1.0]), sol(&[2.0]), sol(&[3.0])],
            &[JobHandle::Remote(10), JobHandle::Remote(11), JobHandle::Remote(12)],
        );

        file.save(&record).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            json!({"/data/resultFile_opt_1.json": [
                {"id": 10, "value": [1.0]},
                {"id": 11, "value": [2.0]},
                {"id": 12, "value": [3.0]}
            ]})
        );
        assert_eq!(file.load().unwrap(), Some(record));
        assert!(file.is_pending());
    }

    #[test]
    fn batch_handles_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = UnresolvedFile::new(dir.path().join("side.json"));
        let handle = JobHandle::Batch(BatchJob {
            job_id: "4711".to_string(),
            script: dir.path().join("tmp_20240101_0000000001.sh"),
        });
        let record = UnresolvedRecord::new("/data/store.json", &[sol(&[0.5])], &[handle]);

        file.save(&record).unwrap();
        assert_eq!(file.load().unwrap(), Some(record));
    }

    #[test]
    fn empty_or_missing_is_not_pending() {
        let dir = TempDir::new().unwrap();
        let file = UnresolvedFile::new(dir.path().join("side.json"));
        assert!(!file.is_pending());

        std::fs::write(file.path(), "").unwrap();
        assert!(!file.is_pending());

        std::fs::write(file.path(), r#"{"/data/store.json": []}"#).unwrap();
        assert!(!file.is_pending());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = UnresolvedFile::new(dir.path().join("side.json"));
        file.save(&UnresolvedRecord::new(
            "/s.json",
            &[sol(&[1.0])],
            &[JobHandle::Remote(1)],
        ))
        .unwrap();

        file.remove().unwrap();
        file.remove().unwrap();
        assert!(!file.path().exists());
    }
}
