//! Saga lifecycle events.
//!
//! The orchestrator describes every state change of an instance as a
//! [`SagaEvent`]; the registry folds them into its [`SagaInstance`]
//! bookkeeping and the monitor receives them as structured notifications.
//!
//! [`SagaInstance`]: crate::instance::SagaInstance

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::SagaContext;
use crate::error::StepError;
use crate::state::SagaStatus;

/// Events that can occur during saga execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// A forward step completed; `context` is the merged context after it.
    StepCompleted(StepCompletedData),

    /// A forward step failed.
    StepFailed(StepFailedData),

    /// Compensation started after a step failure.
    CompensationStarted(CompensationData),

    /// A compensation completed successfully.
    CompensationStepCompleted(StepData),

    /// A compensation failed (logged, compensation continues).
    CompensationStepFailed(StepFailedData),

    /// Every forward step completed.
    SagaCompleted(SagaCompletedData),

    /// The saga ended after compensation.
    SagaFailed(SagaFailedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

/// Data for compensation-completed events.
#[derive(Debug, Clone, Serialize)]
pub struct StepData {
    pub index: usize,
    pub step_name: String,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, Serialize)]
pub struct StepCompletedData {
    pub index: usize,
    pub step_name: String,
    pub context: SagaContext,
}

/// Data for step and compensation failures.
#[derive(Debug, Clone, Serialize)]
pub struct StepFailedData {
    pub index: usize,
    pub step_name: String,
    pub error: StepError,
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, Serialize)]
pub struct CompensationData {
    /// The step whose failure triggered compensation.
    pub from_step: String,
}

/// Data for SagaCompleted event.
#[derive(Debug, Clone, Serialize)]
pub struct SagaCompletedData {
    pub completed_at: DateTime<Utc>,
}

/// Data for SagaFailed event.
#[derive(Debug, Clone, Serialize)]
pub struct SagaFailedData {
    /// `Compensated` or `Failed`.
    pub status: SagaStatus,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn step_completed(index: usize, step_name: impl Into<String>, context: SagaContext) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            index,
            step_name: step_name.into(),
            context,
        })
    }

    pub fn step_failed(index: usize, step_name: impl Into<String>, error: StepError) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            index,
            step_name: step_name.into(),
            error,
        })
    }

    pub fn compensation_started(from_step: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            from_step: from_step.into(),
        })
    }

    pub fn compensation_step_completed(index: usize, step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            index,
            step_name: step_name.into(),
        })
    }

    pub fn compensation_step_failed(
        index: usize,
        step_name: impl Into<String>,
        error: StepError,
    ) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            index,
            step_name: step_name.into(),
            error,
        })
    }

    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn saga_failed(status: SagaStatus, reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            status,
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        assert_eq!(
            SagaEvent::step_completed(0, "create_project", SagaContext::new()).event_type(),
            "StepCompleted"
        );
        assert_eq!(
            SagaEvent::step_failed(1, "create_payment_intent", StepError::failed("x")).event_type(),
            "StepFailed"
        );
        assert_eq!(
            SagaEvent::compensation_started("create_payment_intent").event_type(),
            "CompensationStarted"
        );
        assert_eq!(
            SagaEvent::compensation_step_completed(0, "create_project").event_type(),
            "CompensationStepCompleted"
        );
        assert_eq!(
            SagaEvent::compensation_step_failed(0, "create_project", StepError::failed("x"))
                .event_type(),
            "CompensationStepFailed"
        );
        assert_eq!(SagaEvent::saga_completed().event_type(), "SagaCompleted");
        assert_eq!(
            SagaEvent::saga_failed(SagaStatus::Compensated, "step failed").event_type(),
            "SagaFailed"
        );
    }

    #[test]
    fn test_serialized_shape() {
        let event = SagaEvent::step_failed(
            2,
            "activate_project",
            StepError::Timeout {
                dependency: "payment-service".to_string(),
                after_ms: 3000,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StepFailed");
        assert_eq!(json["data"]["index"], 2);
        assert_eq!(json["data"]["error"]["kind"], "timeout");
    }
}
