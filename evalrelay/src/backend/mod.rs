//! Evaluation backends.
//!
//! A backend accepts solutions, hands back one [`JobHandle`] per solution and
//! later reports whether every handle has finished. Two backends exist:
//!
//! - [`RemoteApiBackend`] - a remote optimization service driven through a
//!   command-line client
//! - [`BatchSchedulerBackend`] - a batch job scheduler (`qsub`) that writes
//!   one output file per job
//!
//! The dispatch engine is generic over [`EvaluationBackend`] so tests can
//! substitute their own implementations. [`Backend`] is the configured,
//! concrete choice used by the CLI.

mod batch;
mod command;
mod remote;

pub use batch::{BatchConfig, BatchSchedulerBackend};
pub use command::{CommandRunner, CommandTemplate, ShellRunner};
pub use remote::{RemoteApiBackend, RemoteConfig};

#[cfg(test)]
pub(crate) use command::tests::MockRunner;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

use crate::recipient::{Recipient, RecipientError};
use crate::solution::Solution;
use crate::store::Evaluation;

/// Errors talking to a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),

    #[error("backend configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Recipient(#[from] RecipientError),
}

/// A submitted batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchJob {
    /// Scheduler job id (the part of the submit output before the first `.`).
    pub job_id: String,
    /// Generated job script.
    pub script: PathBuf,
}

/// Backend-specific identifier of one submitted solution.
///
/// Serialized untagged so remote ids stay plain integers on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobHandle {
    Remote(i64),
    Batch(BatchJob),
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobHandle::Remote(id) => write!(f, "{}", id),
            JobHandle::Batch(job) => write!(f, "{} ({})", job.job_id, job.script.display()),
        }
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// At least one handle is still running.
    Pending,
    /// Every handle finished; one evaluation per handle.
    Resolved(BTreeMap<JobHandle, Evaluation>),
    /// Polling cannot continue.
    Failed(String),
}

/// Capability interface of an evaluation backend.
pub trait EvaluationBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Recipient channel this backend writes results for.
    fn recipient(&self) -> &Recipient;

    /// Whether submissions must be serialized through the setup guard.
    fn requires_setup_lock(&self) -> bool;

    /// Submits solutions, returning one handle per item in order.
    ///
    /// Submissions acknowledged before an error are not rolled back.
    fn submit(
        &self,
        items: &[Solution],
    ) -> impl Future<Output = Result<Vec<JobHandle>, BackendError>> + Send;

    /// Checks whether every handle has finished.
    fn poll(&self, handles: &[JobHandle]) -> impl Future<Output = PollOutcome> + Send;
}

/// Configuration for creating a backend.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Remote(RemoteConfig),
    Batch(BatchConfig),
}

/// The configured backend.
#[derive(Debug)]
pub enum Backend {
    Remote(RemoteApiBackend),
    Batch(BatchSchedulerBackend),
}

impl Backend {
    /// Creates the backend described by `config`, running commands through
    /// the system shell.
    pub fn from_config(config: BackendConfig) -> Result<Self, BackendError> {
        match config {
            BackendConfig::Remote(config) => {
                Ok(Backend::Remote(RemoteApiBackend::new(config, ShellRunner)?))
            }
            BackendConfig::Batch(config) => {
                Ok(Backend::Batch(BatchSchedulerBackend::new(config, ShellRunner)?))
            }
        }
    }
}

impl EvaluationBackend for Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Remote(b) => b.name(),
            Backend::Batch(b) => b.name(),
        }
    }

    fn recipient(&self) -> &Recipient {
        match self {
            Backend::Remote(b) => b.recipient(),
            Backend::Batch(b) => b.recipient(),
        }
    }

    fn requires_setup_lock(&self) -> bool {
        match self {
            Backend::Remote(b) => b.requires_setup_lock(),
            Backend::Batch(b) => b.requires_setup_lock(),
        }
    }

    async fn submit(&self, items: &[Solution]) -> Result<Vec<JobHandle>, BackendError> {
        match self {
            Backend::Remote(b) => b.submit(items).await,
            Backend::Batch(b) => b.submit(items).await,
        }
    }

    async fn poll(&self, handles: &[JobHandle]) -> PollOutcome {
        match self {
            Backend::Remote(b) => b.poll(handles).await,
            Backend::Batch(b) => b.poll(handles).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handles_serialize_untagged() {
        assert_eq!(serde_json::to_value(JobHandle::Remote(42)).unwrap(), json!(42));

        let batch = JobHandle::Batch(BatchJob {
            job_id: "77".to_string(),
            script: PathBuf::from("/w/tmp_20240101_1.sh"),
        });
        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value, json!({"job_id": "77", "script": "/w/tmp_20240101_1.sh"}));
        assert_eq!(serde_json::from_value::<JobHandle>(value).unwrap(), batch);
    }

    #[test]
    fn remote_handles_order_by_id() {
        let mut handles = vec![JobHandle::Remote(9), JobHandle::Remote(2), JobHandle::Remote(5)];
        handles.sort();
        assert_eq!(
            handles,
            vec![JobHandle::Remote(2), JobHandle::Remote(5), JobHandle::Remote(9)]
        );
    }

    #[test]
    fn from_config_builds_remote_backend() {
        let backend = Backend::from_config(BackendConfig::Remote(RemoteConfig {
            match_id: "12".to_string(),
            user_name: "alice".to_string(),
            send_command: "opt send $ID '$SOLUTION'".to_string(),
            get_command: "opt get $ID $USERNAME $SENDLISTSIZE".to_string(),
        }))
        .unwrap();

        assert_eq!(backend.name(), "remote");
        assert_eq!(backend.recipient().as_str(), "opt_12");
        assert!(backend.requires_setup_lock());
    }

    #[test]
    fn from_config_rejects_missing_batch_template() {
        let result = Backend::from_config(BackendConfig::Batch(BatchConfig {
            family: "default".to_string(),
            model: None,
            script_template: PathBuf::from("/nonexistent/evalrelay/template.sh"),
            submit_command: "qsub ${SCRIPT}".to_string(),
            work_dir: std::env::temp_dir(),
        }));
        assert!(matches!(result, Err(BackendError::Io { .. })));
    }
}
