//! HTTP route handlers.

pub mod breakers;
pub mod health;
pub mod metrics;
pub mod monitoring;
pub mod payments;
pub mod projects;
pub mod sagas;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use common::RecordId;
use saga::{SagaContext, SagaDefinition, SagaOutcome};
use tracing::Instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// Extracts the caller's bearer token so it can be forwarded to peers.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Runs a saga on its own task and waits for it.
///
/// The saga keeps running, and compensates if it has to, even when the client
/// disconnects and this handler is dropped.
async fn run_saga(
    state: &AppState,
    definition: SagaDefinition,
    context: SagaContext,
) -> Result<SagaOutcome, ApiError> {
    let orchestrator = state.orchestrator.clone();
    let saga_type = definition.saga_type().to_string();
    let task = tokio::spawn(
        async move { orchestrator.execute_saga(&definition, context).await }.in_current_span(),
    );
    let outcome = task
        .await
        .map_err(|e| ApiError::Internal(format!("Saga {saga_type} did not finish: {e}")))??;
    Ok(outcome)
}

fn parse_record_id(id: &str) -> Result<RecordId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid id '{id}': {e}")))
}
