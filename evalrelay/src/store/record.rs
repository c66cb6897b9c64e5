//! Result record types.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::solution::Fingerprint;

/// Objective value and metadata returned by a backend for one solution.
///
/// `objective` may be absent even for a finished evaluation, for example when
/// the remote API reports an evaluation or scoring error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default)]
    pub objective: Option<f64>,
    #[serde(default)]
    pub info: Option<Value>,
}

impl Evaluation {
    pub fn new(objective: Option<f64>, info: Option<Value>) -> Self {
        Self { objective, info }
    }
}

/// One entry of the result store.
///
/// A record with no objective is a placeholder: the solution was submitted
/// but its evaluation has not been received yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub fingerprint: Fingerprint,
    pub objective: Option<f64>,
    pub info: Option<Value>,
}

impl ResultRecord {
    /// Creates a placeholder record.
    pub fn placeholder(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            objective: None,
            info: None,
        }
    }

    /// Creates a record from a received evaluation.
    pub fn resolved(fingerprint: Fingerprint, evaluation: Evaluation) -> Self {
        Self {
            fingerprint,
            objective: evaluation.objective,
            info: evaluation.info,
        }
    }

    /// Returns true while the objective is still unknown.
    pub fn is_pending(&self) -> bool {
        self.objective.is_none()
    }

    /// Fills fields that are still empty. Returns how many fields changed.
    ///
    /// Fields that already hold a value are never overwritten.
    pub fn fill(&mut self, evaluation: &Evaluation) -> usize {
        let mut changed = 0;
        if self.objective.is_none() && evaluation.objective.is_some() {
            self.objective = evaluation.objective;
            changed += 1;
        }
        if self.info.is_none() && evaluation.info.is_some() {
            self.info = evaluation.info.clone();
            changed += 1;
        }
        changed
    }

    pub(crate) fn body(&self) -> Evaluation {
        Evaluation {
            objective: self.objective,
            info: self.info.clone(),
        }
    }
}

/// Serialized as a single-key object: `{"<fingerprint>": {"objective": .., "info": ..}}`.
impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.fingerprint.as_str(), &self.body())?;
        map.end()
    }
}
