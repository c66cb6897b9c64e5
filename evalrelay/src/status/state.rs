//! Dispatch lifecycle states.

use std::fmt;
use std::str::FromStr;

/// State of one dispatch cycle as recorded in the lifecycle log.
///
/// ```text
/// Waiting → SolutionSending ─┬→ PreviouslySolution
///                            ├→ SolutionSendingError
///                            └→ SolutionSent → EvaluationReceiving ─┬→ EvaluationReceived
///                                                                   └→ EvaluationReceivingError
/// any → ExitedWithCancellation
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    /// Waiting for the previous cycle of the same recipient to finish
    Waiting,
    /// Every requested solution had already been sent
    PreviouslySolution,
    /// Submitting solutions
    SolutionSending,
    /// All solutions submitted
    SolutionSent,
    /// Submission failed
    SolutionSendingError,
    /// Polling for evaluations
    EvaluationReceiving,
    /// All evaluations received
    EvaluationReceived,
    /// Polling failed
    EvaluationReceivingError,
    /// Interrupted by the user
    ExitedWithCancellation,
}

impl DispatchState {
    /// Every state, in lifecycle order.
    pub const ALL: [DispatchState; 9] = [
        DispatchState::Waiting,
        DispatchState::SolutionSending,
        DispatchState::PreviouslySolution,
        DispatchState::SolutionSent,
        DispatchState::SolutionSendingError,
        DispatchState::EvaluationReceiving,
        DispatchState::EvaluationReceived,
        DispatchState::EvaluationReceivingError,
        DispatchState::ExitedWithCancellation,
    ];

    /// Human-readable label written to the log file.
    pub fn label(self) -> &'static str {
        match self {
            DispatchState::Waiting => "Waiting",
            DispatchState::PreviouslySolution => "Previously Sent Solution",
            DispatchState::SolutionSending => "Solution Sending",
            DispatchState::SolutionSent => "Solution Sent",
            DispatchState::SolutionSendingError => "Solution Sending Error",
            DispatchState::EvaluationReceiving => "Evaluation Value Receiving",
            DispatchState::EvaluationReceived => "Evaluation Value Received",
            DispatchState::EvaluationReceivingError => "Evaluation Value Receiving Error",
            DispatchState::ExitedWithCancellation => "Exited with Ctrl-C",
        }
    }

    /// Parses a label written by [`label`](Self::label).
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    /// Returns true if no further progress happens in this cycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchState::EvaluationReceived
                | DispatchState::EvaluationReceivingError
                | DispatchState::SolutionSendingError
                | DispatchState::PreviouslySolution
                | DispatchState::ExitedWithCancellation
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DispatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown dispatch state '{}'", s))
    }
}
