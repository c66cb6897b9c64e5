//! Fingerprint → result cache backing deduplication.
//!
//! On disk the store is a JSON array of single-key objects:
//!
//! ```json
//! [
//!     { "[1,2]": { "objective": 5.0, "info": null } },
//!     { "[3,4]": { "objective": null, "info": null } }
//! ]
//! ```
//!
//! Keys written by older tools in a non-canonical form (`"[1, 2]"`) are
//! canonicalized on read, so they still deduplicate correctly.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::record::{Evaluation, ResultRecord};
use super::{read_json, write_json, StoreError};
use crate::recipient::Recipient;
use crate::solution::{Fingerprint, Solution};

/// File name prefix of per-recipient result stores.
pub const RESULT_FILE_PREFIX: &str = "resultFile_";

/// Outcome of [`ResultStore::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// Items with no stored record, in input order.
    pub to_send: Vec<Solution>,
    /// Stored record for each input position, if any.
    pub known: Vec<Option<ResultRecord>>,
}

/// Persistent result cache for one recipient channel.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    /// Opens a store backed by the given file. Nothing is created until the
    /// first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens the store for a recipient inside `results_dir`.
    pub fn for_recipient(results_dir: &Path, recipient: &Recipient) -> Self {
        Self::new(results_dir.join(format!("{}{}.json", RESULT_FILE_PREFIX, recipient)))
    }

    /// Recovers the recipient from a store path created by [`for_recipient`].
    ///
    /// [`for_recipient`]: ResultStore::for_recipient
    pub fn recipient_from_path(path: &Path) -> Option<Recipient> {
        let stem = path.file_stem()?.to_str()?;
        let name = stem.strip_prefix(RESULT_FILE_PREFIX)?;
        Recipient::new(name).ok()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record in file order.
    pub fn load(&self) -> Result<Vec<ResultRecord>, StoreError> {
        let entries: Vec<BTreeMap<String, Evaluation>> = match read_json(&self.path)? {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };

        let mut records: Vec<ResultRecord> = Vec::with_capacity(entries.len());
        let mut index: HashMap<Fingerprint, usize> = HashMap::new();
        for entry in entries {
            for (key, body) in entry {
                let fingerprint: Fingerprint =
                    key.parse().map_err(|e| StoreError::Corrupt {
                        path: self.path.clone(),
                        reason: format!("{}", e),
                    })?;
                // Two raw keys can canonicalize to the same fingerprint; merge them.
                match index.get(&fingerprint) {
                    Some(&i) => {
                        records[i].fill(&body);
                    }
                    None => {
                        index.insert(fingerprint.clone(), records.len());
                        records.push(ResultRecord::resolved(fingerprint, body));
                    }
                }
            }
        }
        Ok(records)
    }

    fn save(&self, records: &[ResultRecord]) -> Result<(), StoreError> {
        write_json(&self.path, records)
    }

    /// Returns the stored record for one solution.
    pub fn get(&self, solution: &Solution) -> Result<Option<ResultRecord>, StoreError> {
        let fingerprint = solution.fingerprint();
        Ok(self
            .load()?
            .into_iter()
            .find(|r| r.fingerprint == fingerprint))
    }

    /// Splits `items` into those needing submission and the records already
    /// known for each position.
    ///
    /// `known` is always as long as `items` and aligned with it.
    pub fn lookup(&self, items: &[Solution]) -> Result<Lookup, StoreError> {
        let records = self.load()?;
        let by_fingerprint: HashMap<&Fingerprint, &ResultRecord> =
            records.iter().map(|r| (&r.fingerprint, r)).collect();

        let mut to_send = Vec::new();
        let mut known = Vec::with_capacity(items.len());
        for item in items {
            let record = by_fingerprint.get(&item.fingerprint()).map(|r| (*r).clone());
            if record.is_none() {
                to_send.push(item.clone());
            }
            known.push(record);
        }

        debug!(
            store = %self.path.display(),
            items = items.len(),
            to_send = to_send.len(),
            "Result store lookup"
        );
        Ok(Lookup { to_send, known })
    }

    /// Registers placeholders for submitted items. Returns how many records
    /// were created; items that already have a record are left untouched.
    pub fn insert(&self, items: &[Solution]) -> Result<usize, StoreError> {
        let mut records = self.load()?;
        let mut created = 0;
        for item in items {
            let fingerprint = item.fingerprint();
            if !records.iter().any(|r| r.fingerprint == fingerprint) {
                records.push(ResultRecord::placeholder(fingerprint));
                created += 1;
            }
        }
        if created > 0 || !self.path.exists() {
            self.save(&records)?;
        }
        debug!(store = %self.path.display(), created, "Registered placeholders");
        Ok(created)
    }

    /// Fills received evaluations into their records. Returns the number of
    /// fields changed.
    ///
    /// Fields that already hold a value are never overwritten, so calling
    /// this twice with different values keeps the first ones. Items without a
    /// record get one.
    pub fn fill(&self, items: &[Solution], evaluations: &[Evaluation]) -> Result<usize, StoreError> {
        if items.len() != evaluations.len() {
            return Err(StoreError::LengthMismatch {
                items: items.len(),
                evaluations: evaluations.len(),
            });
        }

        let mut records = self.load()?;
        let mut changed = 0;
        let mut created = 0;
        for (item, evaluation) in items.iter().zip(evaluations) {
            let fingerprint = item.fingerprint();
            match records.iter_mut().find(|r| r.fingerprint == fingerprint) {
                Some(record) => changed += record.fill(evaluation),
                None => {
                    records.push(ResultRecord::resolved(fingerprint, evaluation.clone()));
                    created += 1;
                }
            }
        }
        if changed > 0 || created > 0 {
            self.save(&records)?;
        }
        debug!(
            store = %self.path.display(),
            changed,
            created,
            "Filled evaluations"
        );
        Ok(changed)
    }
}
