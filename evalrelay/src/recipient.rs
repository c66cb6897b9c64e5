//! Recipient channel identifiers.
//!
//! A recipient names one backend + target combination, for example
//! `opt_42` (remote API, match 42) or `qsub_gpu_resnet` (batch scheduler,
//! job family `gpu`, model `resnet`). It scopes the result store file and the
//! lifecycle log rows that belong together, so it must be usable both inside
//! a CSV row and inside a file name.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Characters a recipient may not contain.
const FORBIDDEN: &[char] = &[',', '"', '/', '\\', '\n', '\r'];

/// Invalid recipient text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecipientError {
    #[error("recipient must not be empty")]
    Empty,

    #[error("recipient '{0}' contains a forbidden character (one of , \" / \\ or a line break)")]
    ForbiddenCharacter(String),
}

/// Identifier of a logical recipient channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Recipient(String);

impl Recipient {
    /// Validates and wraps a recipient name.
    pub fn new(name: impl Into<String>) -> Result<Self, RecipientError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RecipientError::Empty);
        }
        if name.contains(FORBIDDEN) {
            return Err(RecipientError::ForbiddenCharacter(name));
        }
        Ok(Self(name))
    }

    /// Recipient for a remote-API match: `opt_<match_id>`.
    pub fn remote(match_id: &str) -> Result<Self, RecipientError> {
        Self::new(format!("opt_{}", match_id))
    }

    /// Recipient for a batch-scheduler job family, optionally per model:
    /// `qsub_<family>` or `qsub_<family>_<model>`.
    pub fn batch(family: &str, model: Option<&str>) -> Result<Self, RecipientError> {
        match model {
            Some(model) => Self::new(format!("qsub_{}_{}", family, model)),
            None => Self::new(format!("qsub_{}", family)),
        }
    }

    /// Returns the recipient name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Recipient {
    type Err = RecipientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_and_batch_names() {
        assert_eq!(Recipient::remote("42").unwrap().as_str(), "opt_42");
        assert_eq!(Recipient::batch("gpu", None).unwrap().as_str(), "qsub_gpu");
        assert_eq!(
            Recipient::batch("gpu", Some("resnet")).unwrap().as_str(),
            "qsub_gpu_resnet"
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Recipient::new("  "), Err(RecipientError::Empty));
    }

    #[test]
    fn rejects_csv_and_path_breakers() {
        for bad in ["a,b", "a\"b", "a/b", "a\\b", "a\nb"] {
            assert!(Recipient::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
