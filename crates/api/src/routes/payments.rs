//! Payment endpoints: the intent calls made by the project sagas, and the
//! saga-backed payment and refund flows.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{RecordId, SagaId};
use saga::payment_processing::{CONTEXT_PAYMENT_ID, payment_context, refund_context};
use saga::{PaymentRequest, Record, StoreError, payment_saga, refund_saga};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{bearer_token, parse_record_id, run_saga};
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{PAYMENT_AMOUNT_SCHEMA, PAYMENT_SCHEMA, REFUND_SCHEMA, validate};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSagaResponse {
    pub saga_id: SagaId,
    pub payment: Record,
}

fn payment_not_found(id: &str, err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(_) => ApiError::NotFound(format!("Payment {id} not found")),
        other => other.into(),
    }
}

async fn find_payment(state: &AppState, id: RecordId) -> Result<Record, ApiError> {
    state
        .payments
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment {id} not found")))
}

fn intent_fields(body: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    for key in ["projectId", "amount", "userId"] {
        if let Some(value) = body.get(key) {
            fields.insert(key.to_string(), value.clone());
        }
    }
    fields.insert("status".to_string(), json!("pending"));
    fields
}

/// POST /payments/create — open a pending payment intent.
#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Record>), ApiError> {
    validate(PAYMENT_SCHEMA, &body).map_err(ApiError::Validation)?;
    let intent = state.payments.create(intent_fields(&body)).await?;
    metrics::counter!("payment_intents_created_total").increment(1);
    tracing::info!(payment_intent = %intent.id, "payment intent created");
    Ok((StatusCode::CREATED, Json(intent)))
}

/// POST /payments/{id}/cancel — mark a payment intent cancelled.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let intent_id = parse_record_id(&id)?;
    let mut fields = Map::new();
    fields.insert("status".to_string(), json!("cancelled"));

    let intent = state
        .payments
        .update(intent_id, fields)
        .await
        .map_err(|e| payment_not_found(&id, e))?;
    metrics::counter!("payment_intents_cancelled_total").increment(1);
    tracing::info!(payment_intent = %intent_id, "payment intent cancelled");
    Ok(Json(intent))
}

/// PUT /payments/{id} — change the amount of a payment intent.
#[tracing::instrument(skip(state, body))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Record>, ApiError> {
    let intent_id = parse_record_id(&id)?;
    validate(PAYMENT_AMOUNT_SCHEMA, &body).map_err(ApiError::Validation)?;
    let mut fields = Map::new();
    fields.insert("amount".to_string(), body["amount"].clone());

    let intent = state
        .payments
        .update(intent_id, fields)
        .await
        .map_err(|e| payment_not_found(&id, e))?;
    tracing::info!(payment_intent = %intent_id, "payment intent amount updated");
    Ok(Json(intent))
}

/// GET /payments/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Record>, ApiError> {
    let intent_id = parse_record_id(&id)?;
    find_payment(&state, intent_id).await.map(Json)
}

/// POST /payments/process — run the payment saga for a project.
#[tracing::instrument(skip(state, headers, body))]
pub async fn process(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<PaymentSagaResponse>), ApiError> {
    validate(PAYMENT_SCHEMA, &body).map_err(ApiError::Validation)?;
    let request: PaymentRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid payment: {e}")))?;

    let definition = payment_saga(
        state.payments.clone(),
        state.invoker.clone(),
        bearer_token(&headers),
        state.config.saga_deadline(),
    );
    let outcome = run_saga(&state, definition, payment_context(&request)).await?;

    let payment_id: RecordId = outcome
        .context
        .require(CONTEXT_PAYMENT_ID)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let payment = find_payment(&state, payment_id).await?;
    metrics::counter!("payments_processed_total").increment(1);
    tracing::info!(%payment_id, saga_id = %outcome.saga_id, "payment processed successfully");
    Ok((
        StatusCode::CREATED,
        Json(PaymentSagaResponse {
            saga_id: outcome.saga_id,
            payment,
        }),
    ))
}

/// POST /payments/{id}/refund — run the refund saga for a completed payment.
#[tracing::instrument(skip(state, headers, body))]
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<PaymentSagaResponse>, ApiError> {
    let payment_id = parse_record_id(&id)?;
    validate(REFUND_SCHEMA, &body).map_err(ApiError::Validation)?;
    find_payment(&state, payment_id).await?;

    let definition = refund_saga(
        state.payments.clone(),
        state.invoker.clone(),
        bearer_token(&headers),
        state.config.saga_deadline(),
    );
    let reason = body.get("reason").and_then(Value::as_str);
    let outcome = run_saga(&state, definition, refund_context(payment_id, reason)).await?;

    let payment = find_payment(&state, payment_id).await?;
    metrics::counter!("payments_refunded_total").increment(1);
    tracing::info!(%payment_id, saga_id = %outcome.saga_id, "payment refunded successfully");
    Ok(Json(PaymentSagaResponse {
        saga_id: outcome.saga_id,
        payment,
    }))
}
