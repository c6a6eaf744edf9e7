//! Saga error types.

use breaker::BreakerError;
use common::{RecordId, SagaId};
use serde::Serialize;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors raised by a domain record store.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StoreError {
    /// No record exists with the given ID.
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// The store could not complete the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Why a forward step or a compensation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The dependency's circuit breaker rejected the call without invoking it.
    #[error("Circuit breaker for '{dependency}' is open")]
    CircuitOpen {
        dependency: String,
        retry_after_ms: u64,
    },

    /// The call exceeded the breaker's call timeout.
    #[error("Call to '{dependency}' timed out after {after_ms} ms")]
    Timeout { dependency: String, after_ms: u64 },

    /// The saga-wide deadline expired while this step was running.
    #[error("Saga deadline of {after_ms} ms exceeded")]
    DeadlineExceeded { after_ms: u64 },

    /// The remote peer answered with a non-success status, or could not be reached.
    #[error("Remote call failed: {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    /// A local store operation failed.
    #[error("Store error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    /// The caller stopped waiting before the saga finished.
    #[error("Saga abandoned by its caller before finishing")]
    Abandoned,

    /// Any other step failure.
    #[error("{message}")]
    Failed { message: String },
}

impl StepError {
    /// Creates a generic step failure.
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed {
            message: message.into(),
        }
    }

    /// Creates a transport-level remote failure (no status received).
    pub fn transport(message: impl Into<String>) -> Self {
        StepError::Remote {
            status: None,
            message: message.into(),
        }
    }

    /// Short machine-readable label, used in reports and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::CircuitOpen { .. } => "circuit_open",
            StepError::Timeout { .. } => "timeout",
            StepError::DeadlineExceeded { .. } => "deadline_exceeded",
            StepError::Remote { .. } => "remote",
            StepError::Store { .. } => "store",
            StepError::Abandoned => "abandoned",
            StepError::Failed { .. } => "failed",
        }
    }
}

impl From<BreakerError<StepError>> for StepError {
    fn from(err: BreakerError<StepError>) -> Self {
        match err {
            BreakerError::Open {
                dependency,
                retry_after,
            } => StepError::CircuitOpen {
                dependency,
                retry_after_ms: retry_after.as_millis() as u64,
            },
            BreakerError::Timeout { dependency, after } => StepError::Timeout {
                dependency,
                after_ms: after.as_millis() as u64,
            },
            BreakerError::Inner(inner) => inner,
        }
    }
}

/// A compensation that did not succeed.
///
/// Captured into the saga's compensation report and logged; never propagated
/// on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Compensation of step '{step}' failed: {source}")]
pub struct CompensationError {
    pub index: usize,
    pub step: String,
    #[source]
    pub source: StepError,
}

/// Outcome of a single compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompensationOutcome {
    Succeeded,
    Failed { error: CompensationError },
}

/// One entry of a compensation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompensationResult {
    pub index: usize,
    pub step: String,
    #[serde(flatten)]
    pub outcome: CompensationOutcome,
}

impl CompensationResult {
    pub fn succeeded(index: usize, step: impl Into<String>) -> Self {
        Self {
            index,
            step: step.into(),
            outcome: CompensationOutcome::Succeeded,
        }
    }

    pub fn failed(index: usize, step: impl Into<String>, source: StepError) -> Self {
        let step = step.into();
        Self {
            index,
            outcome: CompensationOutcome::Failed {
                error: CompensationError {
                    index,
                    step: step.clone(),
                    source,
                },
            },
            step,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CompensationOutcome::Succeeded)
    }

    /// Returns the compensation error, if this compensation failed.
    pub fn error(&self) -> Option<&CompensationError> {
        match &self.outcome {
            CompensationOutcome::Succeeded => None,
            CompensationOutcome::Failed { error } => Some(error),
        }
    }
}

/// Terminal result of a saga whose forward path failed.
///
/// This is the only error a saga's caller sees. It carries the original
/// cause and the outcome of every compensation that was attempted, in the
/// order they ran.
#[derive(Debug, Clone, Error)]
#[error("Saga '{saga_type}' ({saga_id}) failed at step '{failed_step}': {cause}")]
pub struct SagaExecutionFailed {
    pub saga_id: SagaId,
    pub saga_type: String,
    pub failed_step: String,
    pub failed_index: usize,
    #[source]
    pub cause: StepError,
    pub compensation_results: Vec<CompensationResult>,
    /// `Compensated` or `Failed`.
    pub status: SagaStatus,
}

impl SagaExecutionFailed {
    /// Returns true if every compensation succeeded.
    pub fn fully_compensated(&self) -> bool {
        self.compensation_results.iter().all(|r| r.is_success())
    }

    /// Compensations that need manual follow-up.
    pub fn failed_compensations(&self) -> impl Iterator<Item = &CompensationError> {
        self.compensation_results.iter().filter_map(|r| r.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_breaker_open_maps_to_circuit_open() {
        let err: StepError = BreakerError::<StepError>::Open {
            dependency: "payment-service".to_string(),
            retry_after: Duration::from_millis(1500),
        }
        .into();
        assert_eq!(
            err,
            StepError::CircuitOpen {
                dependency: "payment-service".to_string(),
                retry_after_ms: 1500
            }
        );
        assert_eq!(err.kind(), "circuit_open");
    }

    #[test]
    fn test_breaker_inner_is_unwrapped() {
        let err: StepError = BreakerError::Inner(StepError::failed("declined")).into();
        assert_eq!(err, StepError::failed("declined"));
    }

    #[test]
    fn test_store_error_converts() {
        let id = RecordId::new();
        let err: StepError = StoreError::NotFound(id).into();
        assert_eq!(err.kind(), "store");
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_compensation_result_serializes_flat() {
        let result = CompensationResult::failed(1, "create_payment_intent", StepError::transport("refused"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["index"], 1);
        assert_eq!(json["step"], "create_payment_intent");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["error"]["source"]["kind"], "remote");
    }

    #[test]
    fn test_failed_compensations_filters() {
        let failure = SagaExecutionFailed {
            saga_id: SagaId::new(),
            saga_type: "create_project".to_string(),
            failed_step: "activate_project".to_string(),
            failed_index: 2,
            cause: StepError::failed("boom"),
            compensation_results: vec![
                CompensationResult::failed(1, "create_payment_intent", StepError::transport("x")),
                CompensationResult::succeeded(0, "create_project"),
            ],
            status: SagaStatus::Failed,
        };
        assert!(!failure.fully_compensated());
        let failed: Vec<_> = failure.failed_compensations().map(|e| e.step.as_str()).collect();
        assert_eq!(failed, vec!["create_payment_intent"]);
    }
}
