//! Saga instance bookkeeping.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::Serialize;

use crate::context::SagaContext;
use crate::error::CompensationResult;
use crate::events::SagaEvent;
use crate::state::SagaStatus;

/// One execution of a saga definition.
///
/// Built from the lifecycle events the orchestrator emits; the registry
/// hands out clones of it for inspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInstance {
    id: SagaId,
    saga_type: String,
    status: SagaStatus,
    steps: Vec<String>,
    completed_step_count: usize,
    context: SagaContext,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    failed_step: Option<String>,
    failure_reason: Option<String>,
    compensations: Vec<CompensationResult>,
}

impl SagaInstance {
    /// Creates a `Started` instance.
    pub fn new(
        id: SagaId,
        saga_type: impl Into<String>,
        steps: Vec<String>,
        context: SagaContext,
    ) -> Self {
        Self {
            id,
            saga_type: saga_type.into(),
            status: SagaStatus::Started,
            steps,
            completed_step_count: 0,
            context,
            started_at: Utc::now(),
            ended_at: None,
            failed_step: None,
            failure_reason: None,
            compensations: Vec::new(),
        }
    }

    /// Moves the instance to `status` if the lifecycle allows it.
    ///
    /// Returns false, leaving the status untouched, for an illegal transition.
    pub fn set_status(&mut self, status: SagaStatus) -> bool {
        let allowed = match status {
            SagaStatus::Started => false,
            SagaStatus::Running => self.status.can_run(),
            SagaStatus::Compensating => self.status.can_compensate(),
            SagaStatus::Completed => self.status == SagaStatus::Running,
            SagaStatus::Compensated | SagaStatus::Failed => {
                self.status == SagaStatus::Compensating
            }
        };
        if !allowed {
            tracing::warn!(
                saga_id = %self.id,
                from = %self.status,
                to = %status,
                "illegal saga status transition ignored"
            );
            return false;
        }
        self.status = status;
        true
    }

    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            SagaEvent::StepCompleted(data) => {
                self.completed_step_count = data.index + 1;
                self.context = data.context;
            }
            SagaEvent::StepFailed(data) => {
                self.failed_step = Some(data.step_name);
                self.failure_reason = Some(data.error.to_string());
            }
            SagaEvent::CompensationStarted(_) => {
                self.set_status(SagaStatus::Compensating);
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.compensations
                    .push(CompensationResult::succeeded(data.index, data.step_name));
            }
            SagaEvent::CompensationStepFailed(data) => {
                // Recorded; the chain keeps going.
                self.compensations.push(CompensationResult::failed(
                    data.index,
                    data.step_name,
                    data.error,
                ));
            }
            SagaEvent::SagaCompleted(data) => {
                if self.set_status(SagaStatus::Completed) {
                    self.ended_at = Some(data.completed_at);
                }
            }
            SagaEvent::SagaFailed(data) => {
                if self.set_status(data.status) {
                    self.ended_at = Some(data.failed_at);
                    if self.failure_reason.is_none() {
                        self.failure_reason = Some(data.reason);
                    }
                }
            }
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn id(&self) -> SagaId {
        self.id
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Names of every step in the definition, in order.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Number of forward steps that finished successfully.
    pub fn completed_step_count(&self) -> usize {
        self.completed_step_count
    }

    pub fn context(&self) -> &SagaContext {
        &self.context
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.failed_step.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Compensation outcomes in the order they ran.
    pub fn compensations(&self) -> &[CompensationResult] {
        &self.compensations
    }
}
