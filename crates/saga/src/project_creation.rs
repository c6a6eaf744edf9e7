//! Project creation saga.
//!
//! Creates a draft project locally, opens a payment intent on the payment
//! service, then activates the project. Compensation cancels the payment
//! intent and marks the project cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::context::SagaContext;
use crate::error::StepError;
use crate::remote::RemoteInvoker;
use crate::services::peer::RemoteRequest;
use crate::services::store::RecordStore;
use crate::step::{SagaDefinition, SagaStep, StepKind};

/// The saga type identifier for project creation.
pub const SAGA_TYPE: &str = "create_project";

/// Step name: Create the project record in draft state.
pub const STEP_CREATE_PROJECT: &str = "create_project";

/// Step name: Open a payment intent for the project budget.
pub const STEP_CREATE_PAYMENT_INTENT: &str = "create_payment_intent";

/// Step name: Mark the project active.
pub const STEP_ACTIVATE_PROJECT: &str = "activate_project";

/// Dependency name of the payment service.
pub const PAYMENT_SERVICE: &str = "payment-service";

/// Context key holding the [`NewProject`] input.
pub const CONTEXT_PROJECT: &str = "project";
pub const CONTEXT_PROJECT_ID: &str = "projectId";
pub const CONTEXT_PAYMENT_INTENT_ID: &str = "paymentIntentId";

/// Input of the project creation saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub user_id: String,
    pub budget: f64,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culmination_date: Option<String>,
}

fn default_priority() -> String {
    "medium".to_string()
}

/// The payment service's answer to `POST /payments/create`.
#[derive(Debug, Clone, Deserialize)]
struct PaymentIntent {
    id: String,
}

/// The object's fields, or nothing for a non-object.
pub(crate) fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) fn project_id(context: &SagaContext) -> Result<RecordId, StepError> {
    context.require(CONTEXT_PROJECT_ID)
}

/// Creates the project with `status=draft`, `paymentStatus=pending`.
pub struct CreateProjectStep {
    store: Arc<dyn RecordStore>,
}

#[async_trait]
impl SagaStep for CreateProjectStep {
    fn name(&self) -> &str {
        STEP_CREATE_PROJECT
    }

    fn kind(&self) -> StepKind {
        StepKind::Local
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let input: NewProject = context.require(CONTEXT_PROJECT)?;
        let mut record = fields(json!(input));
        record.insert("status".into(), json!("draft"));
        record.insert("paymentStatus".into(), json!("pending"));

        let project = self.store.create(record).await?;
        tracing::info!(project_id = %project.id, "project created in draft state");
        Ok(SagaContext::new().with(CONTEXT_PROJECT_ID, project.id.to_string()))
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        let id = project_id(context)?;
        self.store
            .update(
                id,
                fields(json!({ "status": "cancelled", "paymentStatus": "failed" })),
            )
            .await?;
        tracing::info!(project_id = %id, "project marked cancelled");
        Ok(())
    }
}

/// Opens a payment intent for the project budget on the payment service.
pub struct CreatePaymentIntentStep {
    invoker: RemoteInvoker,
    credential: Option<String>,
}

#[async_trait]
impl SagaStep for CreatePaymentIntentStep {
    fn name(&self) -> &str {
        STEP_CREATE_PAYMENT_INTENT
    }

    fn kind(&self) -> StepKind {
        StepKind::remote(PAYMENT_SERVICE)
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let input: NewProject = context.require(CONTEXT_PROJECT)?;
        let project_id = project_id(context)?;

        let request = RemoteRequest::post("/payments/create")
            .bearer(self.credential.as_deref())
            .json(json!({
                "projectId": project_id,
                "amount": input.budget,
                "userId": input.user_id,
            }));
        let intent: PaymentIntent = self.invoker.send(PAYMENT_SERVICE, request).await?.json()?;

        tracing::info!(%project_id, payment_intent = %intent.id, "payment intent created");
        Ok(SagaContext::new().with(CONTEXT_PAYMENT_INTENT_ID, intent.id))
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        let intent_id = context.require_str(CONTEXT_PAYMENT_INTENT_ID)?;
        let request = RemoteRequest::post(format!("/payments/{intent_id}/cancel"))
            .bearer(self.credential.as_deref());
        self.invoker.send(PAYMENT_SERVICE, request).await?;
        tracing::info!(payment_intent = %intent_id, "payment intent cancelled");
        Ok(())
    }
}

/// Moves the project to `status=active`, `paymentStatus=processing` and
/// records its payment intent.
pub struct ActivateProjectStep {
    store: Arc<dyn RecordStore>,
}

#[async_trait]
impl SagaStep for ActivateProjectStep {
    fn name(&self) -> &str {
        STEP_ACTIVATE_PROJECT
    }

    fn kind(&self) -> StepKind {
        StepKind::Local
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let id = project_id(context)?;
        let intent_id = context.require_str(CONTEXT_PAYMENT_INTENT_ID)?;
        let project = self
            .store
            .update(
                id,
                fields(json!({
                    "status": "active",
                    "paymentStatus": "processing",
                    CONTEXT_PAYMENT_INTENT_ID: intent_id,
                })),
            )
            .await?;
        let status = project.get("status").cloned().unwrap_or(Value::Null);
        Ok(SagaContext::new().with("projectStatus", status))
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        let id = project_id(context)?;
        self.store
            .update(
                id,
                fields(json!({ "status": "draft", "paymentStatus": "pending" })),
            )
            .await?;
        Ok(())
    }
}

/// Builds the project creation saga.
///
/// `credential` is the caller's bearer token, forwarded to the payment
/// service. A zero `deadline` leaves the saga unbounded.
pub fn project_creation_saga(
    store: Arc<dyn RecordStore>,
    invoker: RemoteInvoker,
    credential: Option<String>,
    deadline: Duration,
) -> SagaDefinition {
    SagaDefinition::builder(SAGA_TYPE)
        .step(CreateProjectStep {
            store: store.clone(),
        })
        .step(CreatePaymentIntentStep {
            invoker,
            credential,
        })
        .step(ActivateProjectStep { store })
        .deadline(deadline)
        .build()
}

/// Initial context for [`project_creation_saga`].
pub fn initial_context(project: &NewProject) -> SagaContext {
    SagaContext::new().with(CONTEXT_PROJECT, json!(project))
}
