//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use saga::{SagaExecutionFailed, StepError, StoreError};
use serde_json::json;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// The body failed schema validation.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A saga failed and was compensated (fully or partially).
    #[error(transparent)]
    Saga(#[from] Box<SagaExecutionFailed>),

    /// A record store error outside of a saga.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl From<SagaExecutionFailed> for ApiError {
    fn from(err: SagaExecutionFailed) -> Self {
        ApiError::Saga(Box::new(err))
    }
}

/// Status code for a failed saga, chosen by what made it fail.
pub fn saga_status_code(cause: &StepError) -> StatusCode {
    match cause {
        StepError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StepError::Timeout { .. } | StepError::DeadlineExceeded { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        StepError::Remote { .. } => StatusCode::BAD_GATEWAY,
        StepError::Store { .. } | StepError::Abandoned | StepError::Failed { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Validation(errors) => {
                tracing::warn!(?errors, "validation errors");
                (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response()
            }
            ApiError::Saga(err) => saga_failure_response(*err),
            ApiError::Store(err) => {
                let status = match err {
                    StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg }))).into_response()
            }
        }
    }
}

fn saga_failure_response(err: SagaExecutionFailed) -> Response {
    let status = saga_status_code(&err.cause);
    let body = json!({
        "error": format!("Failed to complete {}", err.saga_type),
        "sagaId": err.saga_id,
        "failedStep": err.failed_step,
        "cause": err.cause,
        "message": err.cause.to_string(),
        "status": err.status,
        "compensations": err.compensation_results,
    });

    let mut response = (status, Json(body)).into_response();
    if let StepError::CircuitOpen { retry_after_ms, .. } = err.cause {
        let secs = retry_after_ms.div_ceil(1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
