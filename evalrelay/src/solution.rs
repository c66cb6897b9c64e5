//! Candidate solutions and their canonical fingerprints.
//!
//! A [`Solution`] is the ordered numeric input vector sent to an evaluation
//! backend. Its [`Fingerprint`] is the canonical textual form used as the
//! result store key and as the payload substituted into backend commands.
//!
//! The canonical form is a compact JSON array in which integral values are
//! written without a fractional part and negative zero is normalized, so
//! structurally equal vectors always produce the same fingerprint:
//!
//! ```
//! use evalrelay::solution::Solution;
//!
//! let a = Solution::new(vec![1.0, 2.5]).unwrap();
//! let b = Solution::new(vec![1.0, 2.50]).unwrap();
//! assert_eq!(a.fingerprint(), b.fingerprint());
//! assert_eq!(a.fingerprint().as_str(), "[1,2.5]");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest magnitude at which every integer is exactly representable in f64.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Errors building or parsing solutions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolutionError {
    /// A component is NaN or infinite and has no canonical JSON form.
    #[error("solution component {index} is not finite ({value})")]
    NonFinite { index: usize, value: f64 },

    /// A fingerprint string did not parse back into a numeric vector.
    #[error("invalid fingerprint '{fingerprint}': {reason}")]
    InvalidFingerprint { fingerprint: String, reason: String },
}

/// An ordered numeric input vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution(Vec<f64>);

impl Solution {
    /// Creates a solution, rejecting non-finite components.
    pub fn new(values: Vec<f64>) -> Result<Self, SolutionError> {
        if let Some((index, value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(SolutionError::NonFinite {
                index,
                value: *value,
            });
        }
        Ok(Self(values))
    }

    /// Returns the components of this solution.
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the solution has no components.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the canonical fingerprint of this solution.
    pub fn fingerprint(&self) -> Fingerprint {
        let parts: Vec<String> = self.0.iter().map(|v| canonical_number(*v)).collect();
        Fingerprint(format!("[{}]", parts.join(",")))
    }

    /// Returns the JSON payload handed to backends.
    ///
    /// Identical to the fingerprint text.
    pub fn payload(&self) -> String {
        self.fingerprint().0
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

impl Serialize for Solution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Solution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<f64>::deserialize(deserializer)?;
        Solution::new(values).map_err(serde::de::Error::custom)
    }
}

fn canonical_number(value: f64) -> String {
    // -0.0 == 0.0, so both must print the same way.
    let value = if value == 0.0 { 0.0 } else { value };
    if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        format!("{}", value as i64)
    } else {
        // serde_json prints the shortest representation that round-trips.
        serde_json::Number::from_f64(value)
            .map(|n| n.to_string())
            .unwrap_or_else(|| value.to_string())
    }
}

/// Canonical string form of a [`Solution`], used as the result store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the fingerprint text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the fingerprint back into the solution it was derived from.
    pub fn to_solution(&self) -> Result<Solution, SolutionError> {
        let values: Vec<f64> =
            serde_json::from_str(&self.0).map_err(|e| SolutionError::InvalidFingerprint {
                fingerprint: self.0.clone(),
                reason: e.to_string(),
            })?;
        Solution::new(values)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = SolutionError;

    /// Parses and re-canonicalizes arbitrary JSON array text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = Fingerprint(s.trim().to_string());
        Ok(raw.to_solution()?.fingerprint())
    }
}

impl From<&Solution> for Fingerprint {
    fn from(solution: &Solution) -> Self {
        solution.fingerprint()
    }
}
