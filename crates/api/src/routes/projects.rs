//! Project endpoints: saga-backed creation and update, lookup, and the
//! payment-status hook called by the payment sagas.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{RecordId, SagaId};
use saga::project_creation::{
    CONTEXT_PAYMENT_INTENT_ID, CONTEXT_PROJECT_ID, initial_context, project_creation_saga,
};
use saga::project_update::update_context;
use saga::{NewProject, ProjectChanges, Record, StoreError, project_update_saga};
use serde::Serialize;
use serde_json::{Map, Value};

use super::{bearer_token, parse_record_id, run_saga};
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{PAYMENT_STATUS_SCHEMA, PROJECT_SCHEMA, PROJECT_UPDATE_SCHEMA, validate};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreatedResponse {
    pub saga_id: SagaId,
    pub payment_intent_id: Option<String>,
    pub project: Record,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdatedResponse {
    pub saga_id: SagaId,
    pub project: Record,
}

fn project_not_found(id: &str) -> impl FnOnce(StoreError) -> ApiError + '_ {
    move |e| match e {
        StoreError::NotFound(_) => ApiError::NotFound(format!("Project {id} not found")),
        other => other.into(),
    }
}

/// POST /projects — validate the body and run the project creation saga.
#[tracing::instrument(skip(state, headers, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ProjectCreatedResponse>), ApiError> {
    validate(PROJECT_SCHEMA, &body).map_err(ApiError::Validation)?;
    let project: NewProject = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid project: {e}")))?;

    let definition = project_creation_saga(
        state.projects.clone(),
        state.invoker.clone(),
        bearer_token(&headers),
        state.config.saga_deadline(),
    );
    let outcome = run_saga(&state, definition, initial_context(&project)).await?;

    let project_id: RecordId = outcome
        .context
        .require(CONTEXT_PROJECT_ID)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let record = state
        .projects
        .find_by_id(project_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Project {project_id} vanished after creation")))?;

    tracing::info!(%project_id, saga_id = %outcome.saga_id, "project created successfully");
    Ok((
        StatusCode::CREATED,
        Json(ProjectCreatedResponse {
            saga_id: outcome.saga_id,
            payment_intent_id: outcome
                .context
                .get(CONTEXT_PAYMENT_INTENT_ID)
                .and_then(Value::as_str)
                .map(str::to_string),
            project: record,
        }),
    ))
}

/// GET /projects/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let project_id = parse_record_id(&id)?;
    state
        .projects
        .find_by_id(project_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Project {id} not found")))
}

/// PUT /projects/{id} — run the project update saga for the changed fields.
#[tracing::instrument(skip(state, headers, body))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<ProjectUpdatedResponse>, ApiError> {
    let project_id = parse_record_id(&id)?;
    validate(PROJECT_UPDATE_SCHEMA, &body).map_err(ApiError::Validation)?;
    let changes: ProjectChanges = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid project changes: {e}")))?;
    if changes.is_empty() {
        return Err(ApiError::BadRequest("No updatable fields provided".to_string()));
    }
    if state.projects.find_by_id(project_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Project {id} not found")));
    }

    let definition = project_update_saga(
        state.projects.clone(),
        state.invoker.clone(),
        bearer_token(&headers),
        &changes,
        state.config.saga_deadline(),
    );
    let outcome = run_saga(&state, definition, update_context(project_id, &changes)).await?;

    let record = state
        .projects
        .find_by_id(project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project {id} not found")))?;
    tracing::info!(%project_id, saga_id = %outcome.saga_id, "project updated successfully");
    Ok(Json(ProjectUpdatedResponse {
        saga_id: outcome.saga_id,
        project: record,
    }))
}

/// PUT /projects/{id}/payment-status — set the project's payment status.
#[tracing::instrument(skip(state, body))]
pub async fn update_payment_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Record>, ApiError> {
    let project_id = parse_record_id(&id)?;
    validate(PAYMENT_STATUS_SCHEMA, &body).map_err(ApiError::Validation)?;

    let mut fields = Map::new();
    for key in ["paymentStatus", "paymentId"] {
        if let Some(value) = body.get(key).filter(|v| !v.is_null()) {
            fields.insert(key.to_string(), value.clone());
        }
    }
    let project = state
        .projects
        .update(project_id, fields)
        .await
        .map_err(project_not_found(&id))?;
    tracing::info!(
        %project_id,
        payment_status = project.get_str("paymentStatus").unwrap_or_default(),
        "project payment status updated"
    );
    Ok(Json(project))
}
