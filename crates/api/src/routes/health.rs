//! Health check endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use breaker::BreakerState;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub breakers: BTreeMap<String, BreakerState>,
}

/// GET /health — returns service health, `degraded` while any breaker is open.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let breakers: BTreeMap<_, _> = state
        .breakers()
        .snapshots()
        .into_iter()
        .map(|s| (s.dependency, s.state))
        .collect();
    let status = if breakers.values().any(|s| s.is_open()) {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse { status, breakers })
}
