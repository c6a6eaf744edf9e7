//! Saga lifecycle.

use serde::{Deserialize, Serialize};

/// The status of a saga instance.
///
/// State transitions:
/// ```text
/// Started ──► Running ──┬──► Completed
///                       └──► Compensating ──┬──► Compensated
///                                           └──► Failed
/// ```
/// `Compensated` means every compensation succeeded; `Failed` means at least
/// one of them did not and some effects may still need manual follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Registered, no step has run yet.
    #[default]
    Started,

    /// Forward steps are being executed.
    Running,

    /// A forward step failed and compensations are in progress.
    Compensating,

    /// Every forward step succeeded (terminal state).
    Completed,

    /// Rolled back, all compensations succeeded (terminal state).
    Compensated,

    /// Rolled back, at least one compensation failed (terminal state).
    Failed,
}

impl SagaStatus {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaStatus::Started)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::Running => "RUNNING",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
