//! Dispatch cycle orchestration.
//!
//! A cycle takes a batch of solutions, sends the ones without a cached
//! result to the configured backend, waits for their evaluations and returns
//! one record per input position. See [`DispatchEngine`].

mod engine;

pub use engine::DispatchEngine;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendError;
use crate::guard::GuardError;
use crate::status::StatusError;
use crate::store::StoreError;

/// Default delay between polls of the backend.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default delay between checks of the lifecycle log while waiting.
pub const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(1000);

/// Default time the setup guard is held before submitting.
pub const DEFAULT_SETUP_HOLD: Duration = Duration::from_secs(10);

/// Timing of a dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Delay before each poll of the backend.
    pub poll_interval: Duration,
    /// Delay between checks while waiting for the previous cycle.
    pub idle_check_interval: Duration,
    /// Give up waiting for the previous cycle after this long. `None` waits
    /// indefinitely.
    pub idle_timeout: Option<Duration>,
    /// How long the setup guard is held once acquired.
    pub setup_hold: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
            idle_timeout: None,
            setup_hold: DEFAULT_SETUP_HOLD,
        }
    }
}

/// Errors ending a dispatch cycle.
///
/// Every variant raised after the cycle's lifecycle row exists has already
/// recorded a terminal state for it.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to submit solutions: {0}")]
    Submission(#[source] BackendError),

    #[error("failed to receive evaluations: {reason} (outstanding work saved to {})", .side_record.display())]
    Poll { reason: String, side_record: PathBuf },

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {waited:?} waiting for the previous cycle of {recipient}")]
    IdleTimeout { recipient: String, waited: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Guard(GuardError),

    #[error("no outstanding evaluations recorded in {}", .0.display())]
    MissingSideRecord(PathBuf),

    #[error(
        "outstanding evaluations in the side record belong to {}, not {}",
        .found.display(),
        .expected.display()
    )]
    SideRecordMismatch { expected: PathBuf, found: PathBuf },
}

impl From<GuardError> for DispatchError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Cancelled(_) => DispatchError::Cancelled,
            other => DispatchError::Guard(other),
        }
    }
}

impl DispatchError {
    /// Returns true if the cycle stopped because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }
}
