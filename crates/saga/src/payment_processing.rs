//! Payment and refund sagas.
//!
//! Processing a payment records a pending payment, checks the project on the
//! project service, marks the project paid and completes the payment. If any
//! of that fails the project ends up `payment_failed` and the payment
//! `failed`.
//!
//! A refund marks a completed payment refunded and tells the project service;
//! compensation restores both.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::SagaContext;
use crate::error::{StepError, StoreError};
use crate::project_creation::{CONTEXT_PROJECT_ID, fields};
use crate::remote::RemoteInvoker;
use crate::services::peer::RemoteRequest;
use crate::services::store::RecordStore;
use crate::step::{SagaDefinition, SagaStep, StepKind};

pub const PAYMENT_SAGA_TYPE: &str = "process_payment";
pub const REFUND_SAGA_TYPE: &str = "process_refund";

pub const STEP_CREATE_PAYMENT: &str = "create_payment";
pub const STEP_VALIDATE_PROJECT: &str = "validate_project";
pub const STEP_UPDATE_PROJECT_PAYMENT_STATUS: &str = "update_project_payment_status";
pub const STEP_COMPLETE_PAYMENT: &str = "complete_payment";
pub const STEP_REFUND_PAYMENT: &str = "refund_payment";
pub const STEP_MARK_PROJECT_REFUNDED: &str = "mark_project_refunded";

/// Dependency name of the project service.
pub const PROJECT_SERVICE: &str = "project-service";

/// Context key holding the [`PaymentRequest`] input.
pub const CONTEXT_PAYMENT: &str = "payment";
pub const CONTEXT_PAYMENT_ID: &str = "paymentId";
pub const CONTEXT_REFUND_REASON: &str = "reason";
/// Payment status before the refund, restored by its compensation.
pub const CONTEXT_PREVIOUS_STATUS: &str = "previousStatus";

/// Input of the payment saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub project_id: String,
    pub amount: f64,
    pub user_id: String,
}

fn payment_id(context: &SagaContext) -> Result<RecordId, StepError> {
    context.require(CONTEXT_PAYMENT_ID)
}

async fn set_payment_status(
    payments: &dyn RecordStore,
    id: RecordId,
    status: &str,
) -> Result<(), StepError> {
    payments.update(id, fields(json!({ "status": status }))).await?;
    tracing::info!(payment_id = %id, status, "payment status changed");
    Ok(())
}

/// Sets the project's payment status on the project service.
async fn put_project_payment_status(
    invoker: &RemoteInvoker,
    credential: Option<&str>,
    project_id: &str,
    payment_id: &str,
    status: &str,
) -> Result<(), StepError> {
    let request = RemoteRequest::put(format!("/projects/{project_id}/payment-status"))
        .bearer(credential)
        .json(json!({ "paymentStatus": status, "paymentId": payment_id }));
    invoker.send(PROJECT_SERVICE, request).await?;
    tracing::info!(%project_id, status, "project payment status updated");
    Ok(())
}

/// Records the payment as `pending`.
pub struct CreatePaymentStep {
    payments: Arc<dyn RecordStore>,
}

#[async_trait]
impl SagaStep for CreatePaymentStep {
    fn name(&self) -> &str {
        STEP_CREATE_PAYMENT
    }

    fn kind(&self) -> StepKind {
        StepKind::Local
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let input: PaymentRequest = context.require(CONTEXT_PAYMENT)?;
        let mut record = fields(json!(input));
        record.insert("status".into(), json!("pending"));

        let payment = self.payments.create(record).await?;
        tracing::info!(payment_id = %payment.id, project_id = %input.project_id, "payment recorded");
        Ok(SagaContext::new()
            .with(CONTEXT_PAYMENT_ID, payment.id.to_string())
            .with(CONTEXT_PROJECT_ID, input.project_id))
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        set_payment_status(self.payments.as_ref(), payment_id(context)?, "failed").await
    }
}

/// Checks that the project exists and can still be paid for.
pub struct ValidateProjectStep {
    invoker: RemoteInvoker,
    credential: Option<String>,
}

#[async_trait]
impl SagaStep for ValidateProjectStep {
    fn name(&self) -> &str {
        STEP_VALIDATE_PROJECT
    }

    fn kind(&self) -> StepKind {
        StepKind::remote(PROJECT_SERVICE)
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let project_id = context.require_str(CONTEXT_PROJECT_ID)?;
        let request =
            RemoteRequest::get(format!("/projects/{project_id}")).bearer(self.credential.as_deref());
        let project = self.invoker.send(PROJECT_SERVICE, request).await?.body;

        let status = project.get("status").cloned().unwrap_or(Value::Null);
        if status == "cancelled" {
            return Err(StepError::failed(format!(
                "Project {project_id} is cancelled and cannot be paid for"
            )));
        }
        Ok(SagaContext::new().with("projectStatus", status))
    }

    async fn compensate(&self, _context: &SagaContext) -> Result<(), StepError> {
        Ok(())
    }
}

/// Marks the project `paid` on the project service.
pub struct UpdateProjectPaymentStatusStep {
    invoker: RemoteInvoker,
    credential: Option<String>,
}

#[async_trait]
impl SagaStep for UpdateProjectPaymentStatusStep {
    fn name(&self) -> &str {
        STEP_UPDATE_PROJECT_PAYMENT_STATUS
    }

    fn kind(&self) -> StepKind {
        StepKind::remote(PROJECT_SERVICE)
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        put_project_payment_status(
            &self.invoker,
            self.credential.as_deref(),
            context.require_str(CONTEXT_PROJECT_ID)?,
            context.require_str(CONTEXT_PAYMENT_ID)?,
            "paid",
        )
        .await?;
        Ok(SagaContext::new())
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        put_project_payment_status(
            &self.invoker,
            self.credential.as_deref(),
            context.require_str(CONTEXT_PROJECT_ID)?,
            context.require_str(CONTEXT_PAYMENT_ID)?,
            "payment_failed",
        )
        .await
    }
}

/// Moves the payment to `completed`.
pub struct CompletePaymentStep {
    payments: Arc<dyn RecordStore>,
}

#[async_trait]
impl SagaStep for CompletePaymentStep {
    fn name(&self) -> &str {
        STEP_COMPLETE_PAYMENT
    }

    fn kind(&self) -> StepKind {
        StepKind::Local
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let id = payment_id(context)?;
        self.payments
            .update(
                id,
                fields(json!({
                    "status": "completed",
                    "completedAt": chrono::Utc::now().to_rfc3339(),
                })),
            )
            .await?;
        tracing::info!(payment_id = %id, "payment completed");
        Ok(SagaContext::new().with("paymentStatus", "completed"))
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        set_payment_status(self.payments.as_ref(), payment_id(context)?, "failed").await
    }
}

/// Marks a completed payment `refunded`.
pub struct RefundPaymentStep {
    payments: Arc<dyn RecordStore>,
}

#[async_trait]
impl SagaStep for RefundPaymentStep {
    fn name(&self) -> &str {
        STEP_REFUND_PAYMENT
    }

    fn kind(&self) -> StepKind {
        StepKind::Local
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let id = payment_id(context)?;
        let payment = self
            .payments
            .find_by_id(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let previous = payment.get_str("status").unwrap_or_default().to_string();
        if previous != "completed" {
            return Err(StepError::failed(format!(
                "Payment {id} cannot be refunded from status '{previous}'"
            )));
        }
        let project_id = payment.get_str("projectId").ok_or_else(|| {
            StepError::failed(format!("Payment {id} has no project"))
        })?;

        let reason = context
            .get(CONTEXT_REFUND_REASON)
            .cloned()
            .unwrap_or(Value::Null);
        self.payments
            .update(
                id,
                fields(json!({ "status": "refunded", "refundReason": reason })),
            )
            .await?;
        tracing::info!(payment_id = %id, "payment refunded");

        Ok(SagaContext::new()
            .with(CONTEXT_PROJECT_ID, project_id)
            .with(CONTEXT_PREVIOUS_STATUS, previous))
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        let id = payment_id(context)?;
        let previous = context.require_str(CONTEXT_PREVIOUS_STATUS)?;
        self.payments
            .update(
                id,
                fields(json!({ "status": previous, "refundReason": Value::Null })),
            )
            .await?;
        tracing::info!(payment_id = %id, status = previous, "payment refund reverted");
        Ok(())
    }
}

/// Marks the project `refunded` on the project service.
pub struct MarkProjectRefundedStep {
    invoker: RemoteInvoker,
    credential: Option<String>,
}

#[async_trait]
impl SagaStep for MarkProjectRefundedStep {
    fn name(&self) -> &str {
        STEP_MARK_PROJECT_REFUNDED
    }

    fn kind(&self) -> StepKind {
        StepKind::remote(PROJECT_SERVICE)
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        put_project_payment_status(
            &self.invoker,
            self.credential.as_deref(),
            context.require_str(CONTEXT_PROJECT_ID)?,
            context.require_str(CONTEXT_PAYMENT_ID)?,
            "refunded",
        )
        .await?;
        Ok(SagaContext::new())
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        put_project_payment_status(
            &self.invoker,
            self.credential.as_deref(),
            context.require_str(CONTEXT_PROJECT_ID)?,
            context.require_str(CONTEXT_PAYMENT_ID)?,
            "paid",
        )
        .await
    }
}

/// Builds the payment saga.
pub fn payment_saga(
    payments: Arc<dyn RecordStore>,
    invoker: RemoteInvoker,
    credential: Option<String>,
    deadline: Duration,
) -> SagaDefinition {
    SagaDefinition::builder(PAYMENT_SAGA_TYPE)
        .step(CreatePaymentStep {
            payments: payments.clone(),
        })
        .step(ValidateProjectStep {
            invoker: invoker.clone(),
            credential: credential.clone(),
        })
        .step(UpdateProjectPaymentStatusStep {
            invoker,
            credential,
        })
        .step(CompletePaymentStep { payments })
        .deadline(deadline)
        .build()
}

/// Builds the refund saga.
pub fn refund_saga(
    payments: Arc<dyn RecordStore>,
    invoker: RemoteInvoker,
    credential: Option<String>,
    deadline: Duration,
) -> SagaDefinition {
    SagaDefinition::builder(REFUND_SAGA_TYPE)
        .step(RefundPaymentStep { payments })
        .step(MarkProjectRefundedStep {
            invoker,
            credential,
        })
        .deadline(deadline)
        .build()
}

/// Initial context for [`payment_saga`].
pub fn payment_context(request: &PaymentRequest) -> SagaContext {
    SagaContext::new().with(CONTEXT_PAYMENT, json!(request))
}

/// Initial context for [`refund_saga`].
pub fn refund_context(payment_id: RecordId, reason: Option<&str>) -> SagaContext {
    let context = SagaContext::new().with(CONTEXT_PAYMENT_ID, payment_id.to_string());
    match reason {
        Some(reason) => context.with(CONTEXT_REFUND_REASON, reason),
        None => context,
    }
}
