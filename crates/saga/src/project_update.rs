//! Project update saga.
//!
//! Applies field changes to a project and, when the budget changes, moves the
//! project's payment intent to the new amount. Compensation puts the previous
//! amount back on the intent and restores the fields the update overwrote.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::context::SagaContext;
use crate::error::{StepError, StoreError};
use crate::project_creation::{
    CONTEXT_PAYMENT_INTENT_ID, CONTEXT_PROJECT_ID, PAYMENT_SERVICE, fields, project_id,
};
use crate::remote::RemoteInvoker;
use crate::services::peer::RemoteRequest;
use crate::services::store::RecordStore;
use crate::step::{SagaDefinition, SagaStep, StepKind};

pub const SAGA_TYPE: &str = "update_project";

/// Step name: Write the changed fields to the project record.
pub const STEP_UPDATE_PROJECT: &str = "update_project";

/// Step name: Move the payment intent to the new budget.
pub const STEP_UPDATE_PAYMENT: &str = "update_payment";

/// Context key holding the [`ProjectChanges`] input.
pub const CONTEXT_CHANGES: &str = "changes";
/// Context key holding the overwritten field values, keyed by field name.
pub const CONTEXT_ORIGINAL_FIELDS: &str = "originalFields";
pub const CONTEXT_PREVIOUS_BUDGET: &str = "previousBudget";
pub const CONTEXT_PAYMENT_UPDATED: &str = "paymentUpdated";

/// Input of the project update saga. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culmination_date: Option<String>,
}

impl ProjectChanges {
    /// The changed fields, as stored on the project record.
    pub fn fields(&self) -> Map<String, Value> {
        fields(json!(self))
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

/// Writes the changes, remembering what they overwrote.
pub struct UpdateProjectStep {
    store: Arc<dyn RecordStore>,
}

#[async_trait]
impl SagaStep for UpdateProjectStep {
    fn name(&self) -> &str {
        STEP_UPDATE_PROJECT
    }

    fn kind(&self) -> StepKind {
        StepKind::Local
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let id = project_id(context)?;
        let changes: ProjectChanges = context.require(CONTEXT_CHANGES)?;
        let project = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        if project.get_str("status") == Some("cancelled") {
            return Err(StepError::failed(format!("Project {id} is cancelled")));
        }

        let changed = changes.fields();
        let original: Map<String, Value> = changed
            .keys()
            .map(|key| (key.clone(), project.get(key).cloned().unwrap_or(Value::Null)))
            .collect();
        self.store.update(id, changed).await?;
        tracing::info!(project_id = %id, fields = original.len(), "project fields updated");

        let mut patch = SagaContext::new()
            .with(CONTEXT_ORIGINAL_FIELDS, Value::Object(original))
            .with(
                CONTEXT_PREVIOUS_BUDGET,
                project.get("budget").cloned().unwrap_or(Value::Null),
            );
        if let Some(intent_id) = project.get_str(CONTEXT_PAYMENT_INTENT_ID) {
            patch.insert(CONTEXT_PAYMENT_INTENT_ID, intent_id);
        }
        Ok(patch)
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        let id = project_id(context)?;
        let original: Map<String, Value> = context.require(CONTEXT_ORIGINAL_FIELDS)?;
        self.store.update(id, original).await?;
        tracing::info!(project_id = %id, "project fields restored");
        Ok(())
    }
}

/// Sets the project's payment intent to the new budget.
///
/// A project without a payment intent has nothing to update.
pub struct UpdatePaymentStep {
    invoker: RemoteInvoker,
    credential: Option<String>,
}

impl UpdatePaymentStep {
    async fn set_amount(&self, intent_id: &str, amount: Value) -> Result<(), StepError> {
        let request = RemoteRequest::put(format!("/payments/{intent_id}"))
            .bearer(self.credential.as_deref())
            .json(json!({ "amount": amount }));
        self.invoker.send(PAYMENT_SERVICE, request).await?;
        Ok(())
    }
}

#[async_trait]
impl SagaStep for UpdatePaymentStep {
    fn name(&self) -> &str {
        STEP_UPDATE_PAYMENT
    }

    fn kind(&self) -> StepKind {
        StepKind::remote(PAYMENT_SERVICE)
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        let changes: ProjectChanges = context.require(CONTEXT_CHANGES)?;
        let (Some(budget), Some(intent_id)) = (
            changes.budget,
            context.get(CONTEXT_PAYMENT_INTENT_ID).and_then(Value::as_str),
        ) else {
            tracing::debug!("no payment intent to update");
            return Ok(SagaContext::new().with(CONTEXT_PAYMENT_UPDATED, false));
        };

        self.set_amount(intent_id, json!(budget)).await?;
        tracing::info!(payment_intent = %intent_id, budget, "payment intent amount updated");
        Ok(SagaContext::new().with(CONTEXT_PAYMENT_UPDATED, true))
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        if context.get(CONTEXT_PAYMENT_UPDATED) != Some(&Value::Bool(true)) {
            return Ok(());
        }
        let intent_id = context.require_str(CONTEXT_PAYMENT_INTENT_ID)?;
        let previous = context
            .get(CONTEXT_PREVIOUS_BUDGET)
            .cloned()
            .unwrap_or(Value::Null);
        if previous.is_null() {
            return Ok(());
        }
        self.set_amount(intent_id, previous).await?;
        tracing::info!(payment_intent = %intent_id, "payment intent amount reverted");
        Ok(())
    }
}

/// Builds the project update saga for `changes`.
///
/// The payment step is only part of the saga when the budget changes.
pub fn project_update_saga(
    store: Arc<dyn RecordStore>,
    invoker: RemoteInvoker,
    credential: Option<String>,
    changes: &ProjectChanges,
    deadline: Duration,
) -> SagaDefinition {
    let mut builder = SagaDefinition::builder(SAGA_TYPE).step(UpdateProjectStep { store });
    if changes.budget.is_some() {
        builder = builder.step(UpdatePaymentStep {
            invoker,
            credential,
        });
    }
    builder.deadline(deadline).build()
}

/// Initial context for [`project_update_saga`].
pub fn update_context(project_id: RecordId, changes: &ProjectChanges) -> SagaContext {
    SagaContext::new()
        .with(CONTEXT_PROJECT_ID, project_id.to_string())
        .with(CONTEXT_CHANGES, json!(changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SagaOrchestrator;
    use crate::project_creation::{initial_context, project_creation_saga};
    use crate::registry::SagaRegistry;
    use crate::services::{InMemoryMonitor, InMemoryPaymentPeer, InMemoryRecordStore};
    use crate::state::SagaStatus;
    use crate::NewProject;
    use breaker::BreakerRegistry;

    struct Fixture {
        store: InMemoryRecordStore,
        peer: InMemoryPaymentPeer,
        invoker: RemoteInvoker,
        orchestrator: SagaOrchestrator,
    }

    fn fixture() -> Fixture {
        let peer = InMemoryPaymentPeer::new();
        let breakers = BreakerRegistry::default();
        Fixture {
            store: InMemoryRecordStore::new(),
            invoker: RemoteInvoker::new(breakers.clone())
                .with_peer(PAYMENT_SERVICE, Arc::new(peer.clone())),
            peer,
            orchestrator: SagaOrchestrator::new(
                SagaRegistry::default(),
                breakers,
                Arc::new(InMemoryMonitor::default()),
            ),
        }
    }

    impl Fixture {
        /// Creates an active project with a 1500 budget through the creation saga.
        async fn project(&self) -> RecordId {
            let project = NewProject {
                title: "Bridge repair".to_string(),
                description: Some("Replace the deck".to_string()),
                user_id: "42".to_string(),
                budget: 1500.0,
                priority: "high".to_string(),
                culmination_date: None,
            };
            let saga = project_creation_saga(
                Arc::new(self.store.clone()),
                self.invoker.clone(),
                None,
                Duration::ZERO,
            );
            let outcome = self
                .orchestrator
                .execute_saga(&saga, initial_context(&project))
                .await
                .unwrap();
            outcome.context.require(CONTEXT_PROJECT_ID).unwrap()
        }

        async fn update(
            &self,
            id: RecordId,
            changes: &ProjectChanges,
        ) -> Result<crate::SagaOutcome, crate::SagaExecutionFailed> {
            let saga = project_update_saga(
                Arc::new(self.store.clone()),
                self.invoker.clone(),
                Some("token-1".to_string()),
                changes,
                Duration::ZERO,
            );
            self.orchestrator
                .execute_saga(&saga, update_context(id, changes))
                .await
        }
    }

    #[tokio::test]
    async fn test_field_change_skips_payment() {
        let f = fixture();
        let id = f.project().await;
        let changes = ProjectChanges {
            title: Some("Bridge rebuild".to_string()),
            ..ProjectChanges::default()
        };

        let outcome = f.update(id, &changes).await.unwrap();

        let project = f.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(project.get_str("title"), Some("Bridge rebuild"));
        assert_eq!(
            outcome.context.get(CONTEXT_ORIGINAL_FIELDS),
            Some(&json!({ "title": "Bridge repair" }))
        );
        // Only the creation saga talked to the payment service.
        assert_eq!(f.peer.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_budget_change_updates_payment_intent() {
        let f = fixture();
        let id = f.project().await;
        let changes = ProjectChanges {
            budget: Some(2500.0),
            ..ProjectChanges::default()
        };

        let outcome = f.update(id, &changes).await.unwrap();

        assert_eq!(outcome.context.get(CONTEXT_PAYMENT_UPDATED), Some(&json!(true)));
        assert_eq!(f.peer.intent_amount("PI-0001"), Some(2500.0));
        let request = f.peer.requests().pop().unwrap();
        assert_eq!(request.method.as_str(), "PUT");
        assert_eq!(request.path, "/payments/PI-0001");
        assert_eq!(request.header_value("authorization"), Some("Bearer token-1"));

        let project = f.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(project.get("budget"), Some(&json!(2500.0)));
    }

    #[tokio::test]
    async fn test_payment_failure_restores_original_fields() {
        let f = fixture();
        let id = f.project().await;
        f.peer.set_fail_on_update(true);
        let changes = ProjectChanges {
            title: Some("Bridge rebuild".to_string()),
            budget: Some(2500.0),
            priority: Some("low".to_string()),
            ..ProjectChanges::default()
        };

        let err = f.update(id, &changes).await.unwrap_err();

        assert_eq!(err.failed_step, STEP_UPDATE_PAYMENT);
        assert_eq!(err.status, SagaStatus::Compensated);
        let project = f.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(project.get_str("title"), Some("Bridge repair"));
        assert_eq!(project.get_str("priority"), Some("high"));
        assert_eq!(project.get("budget"), Some(&json!(1500.0)));
        assert_eq!(f.peer.intent_amount("PI-0001"), Some(1500.0));
    }

    /// Accepts the payment update, then fails the saga after it.
    struct FailAfter;

    #[async_trait]
    impl SagaStep for FailAfter {
        fn name(&self) -> &str {
            "notify"
        }

        fn kind(&self) -> StepKind {
            StepKind::Local
        }

        async fn execute(&self, _context: &SagaContext) -> Result<SagaContext, StepError> {
            Err(StepError::failed("notification failed"))
        }

        async fn compensate(&self, _context: &SagaContext) -> Result<(), StepError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_compensation_reverts_payment_amount() {
        let f = fixture();
        let id = f.project().await;
        let changes = ProjectChanges {
            budget: Some(900.0),
            ..ProjectChanges::default()
        };
        let saga = SagaDefinition::builder(SAGA_TYPE)
            .step(UpdateProjectStep {
                store: Arc::new(f.store.clone()),
            })
            .step(UpdatePaymentStep {
                invoker: f.invoker.clone(),
                credential: None,
            })
            .step(FailAfter)
            .build();

        let err = f
            .orchestrator
            .execute_saga(&saga, update_context(id, &changes))
            .await
            .unwrap_err();

        assert!(err.fully_compensated());
        assert_eq!(f.peer.intent_amount("PI-0001"), Some(1500.0));
        let amounts: Vec<_> = f
            .peer
            .requests()
            .iter()
            .filter(|r| r.method.as_str() == "PUT")
            .map(|r| r.body.as_ref().unwrap()["amount"].clone())
            .collect();
        assert_eq!(amounts, vec![json!(900.0), json!(1500.0)]);
    }

    #[tokio::test]
    async fn test_cancelled_project_is_not_updated() {
        let f = fixture();
        let id = f.project().await;
        f.store.update(id, fields(json!({ "status": "cancelled" }))).await.unwrap();

        let err = f
            .update(id, &ProjectChanges { budget: Some(10.0), ..ProjectChanges::default() })
            .await
            .unwrap_err();

        assert_eq!(err.failed_index, 0);
        assert!(err.compensation_results.is_empty());
        assert_eq!(f.peer.intent_amount("PI-0001"), Some(1500.0));
    }

    #[tokio::test]
    async fn test_unknown_project_fails_with_not_found() {
        let f = fixture();
        let id = RecordId::new();
        let err = f
            .update(id, &ProjectChanges { title: Some("x".to_string()), ..ProjectChanges::default() })
            .await
            .unwrap_err();
        assert_eq!(err.cause, StepError::from(StoreError::NotFound(id)));
    }

    #[test]
    fn test_changes_fields() {
        let changes: ProjectChanges =
            serde_json::from_value(json!({ "budget": 10, "culminationDate": "2026-12-31" })).unwrap();
        let fields = changes.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["culminationDate"], "2026-12-31");
        assert!(ProjectChanges::default().is_empty());
    }
}
