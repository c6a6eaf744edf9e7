//! Circuit breaker inspection and reset.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use breaker::BreakerSnapshot;

use crate::state::AppState;

/// GET /breakers — snapshot of every breaker, sorted by dependency.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.breakers().snapshots())
}

/// POST /breakers/reset — close every breaker and clear its counters.
pub async fn reset(State(state): State<Arc<AppState>>) -> Json<Vec<BreakerSnapshot>> {
    state.breakers().reset_all();
    tracing::warn!("all circuit breakers reset");
    Json(state.breakers().snapshots())
}
