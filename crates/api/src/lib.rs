//! HTTP surface for the saga orchestration service.
//!
//! Exposes project creation and update as sagas over the payment service,
//! payment processing and refunds as sagas over the project service, the
//! endpoints those sagas call, and inspection routes for running sagas and
//! circuit breakers. Logs go through `tracing`, metrics through Prometheus.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod validation;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use breaker::ConfigError;
use config::Config;
use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/projects", post(routes::projects::create))
        .route(
            "/projects/{id}",
            get(routes::projects::get).put(routes::projects::update),
        )
        .route(
            "/projects/{id}/payment-status",
            put(routes::projects::update_payment_status),
        )
        .route("/payments/create", post(routes::payments::create))
        .route("/payments/process", post(routes::payments::process))
        .route(
            "/payments/{id}",
            get(routes::payments::get).put(routes::payments::update),
        )
        .route("/payments/{id}/cancel", post(routes::payments::cancel))
        .route("/payments/{id}/refund", post(routes::payments::refund))
        .route("/sagas", get(routes::sagas::list))
        .route("/sagas/{id}", get(routes::sagas::get))
        .route("/breakers", get(routes::breakers::list))
        .route("/breakers/reset", post(routes::breakers::reset))
        .route("/monitoring", get(routes::monitoring::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state, reaching the payment service over HTTP.
pub fn create_default_state(config: Config) -> Result<Arc<AppState>, ConfigError> {
    AppState::from_config(config).map(Arc::new)
}
