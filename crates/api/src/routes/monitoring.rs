//! Monitoring summary endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use saga::{MonitorEvent, MonitorSummary, RegistryMetrics};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringResponse {
    pub summary: MonitorSummary,
    pub sagas: RegistryMetrics,
    pub recent_events: Vec<MonitorEvent>,
}

/// GET /monitoring — saga counters, breaker states, and recent events.
pub async fn get(State(state): State<Arc<AppState>>) -> Json<MonitoringResponse> {
    Json(MonitoringResponse {
        summary: state.monitor.summary(),
        sagas: state.registry().metrics().await,
        recent_events: state.monitor.events(),
    })
}
