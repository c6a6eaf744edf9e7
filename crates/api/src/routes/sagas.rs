//! Saga inspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use saga::SagaInstance;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SagaListResponse {
    pub active: Vec<SagaInstance>,
    pub recent: Vec<SagaInstance>,
}

/// GET /sagas — running sagas and those finished within the retention window.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<SagaListResponse> {
    let registry = state.registry();
    Json(SagaListResponse {
        active: registry.list_active().await,
        recent: registry.list_recent().await,
    })
}

/// GET /sagas/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaInstance>, ApiError> {
    let saga_id: SagaId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga id '{id}': {e}")))?;
    state
        .orchestrator
        .get_saga(saga_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))
}
