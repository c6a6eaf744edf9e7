//! In-memory stand-in for the payment service's HTTP endpoints.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::StepError;
use crate::services::peer::{RemotePeer, RemoteRequest, RemoteResponse};

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    intents: HashMap<String, (Value, &'static str)>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_cancel: bool,
    fail_on_update: bool,
    delay: Duration,
    requests: Vec<RemoteRequest>,
}

/// Answers `POST /payments/create`, `PUT /payments/{id}` and
/// `POST /payments/{id}/cancel` the way the payment service does, without a
/// network.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentPeer {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentPeer {
    /// Creates a new in-memory payment peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the peer to answer 502 on create.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Configures the peer to answer 502 on cancel.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state.write().unwrap().fail_on_cancel = fail;
    }

    /// Configures the peer to answer 502 on amount updates.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.state.write().unwrap().fail_on_update = fail;
    }

    /// Delays every response, to exercise call timeouts.
    pub fn set_delay(&self, delay: Duration) {
        self.state.write().unwrap().delay = delay;
    }

    /// Returns the number of payment intents that are not cancelled.
    pub fn active_intent_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .intents
            .values()
            .filter(|(_, status)| *status != "cancelled")
            .count()
    }

    /// Returns the status of an intent, if it exists.
    pub fn intent_status(&self, id: &str) -> Option<&'static str> {
        self.state.read().unwrap().intents.get(id).map(|(_, s)| *s)
    }

    /// Returns the current amount of an intent, if it exists.
    pub fn intent_amount(&self, id: &str) -> Option<f64> {
        self.state
            .read()
            .unwrap()
            .intents
            .get(id)
            .and_then(|(body, _)| body.get("amount"))
            .and_then(Value::as_f64)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.state.read().unwrap().requests.clone()
    }

    fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        let mut state = self.state.write().unwrap();
        state.requests.push(request.clone());

        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        match (request.method.as_str(), segments.as_slice()) {
            ("POST", ["payments", "create"]) => {
                if state.fail_on_create {
                    return RemoteResponse::new(502, json!({ "error": "Payment service error" }));
                }
                state.next_id += 1;
                let id = format!("PI-{:04}", state.next_id);
                let body = request.body.clone().unwrap_or(Value::Null);
                state.intents.insert(id.clone(), (body.clone(), "pending"));
                RemoteResponse::new(
                    201,
                    json!({
                        "id": id,
                        "status": "pending",
                        "projectId": body.get("projectId").cloned().unwrap_or(Value::Null),
                        "amount": body.get("amount").cloned().unwrap_or(Value::Null),
                    }),
                )
            }
            ("PUT", ["payments", id]) => {
                if state.fail_on_update {
                    return RemoteResponse::new(502, json!({ "error": "Payment update failed" }));
                }
                let Some(amount) = request.body.as_ref().and_then(|b| b.get("amount")).cloned()
                else {
                    return RemoteResponse::new(400, json!({ "error": "amount is required" }));
                };
                match state.intents.get_mut(*id) {
                    Some((body, status)) => {
                        if let Some(fields) = body.as_object_mut() {
                            fields.insert("amount".to_string(), amount.clone());
                        } else {
                            *body = json!({ "amount": amount });
                        }
                        RemoteResponse::new(
                            200,
                            json!({ "id": id, "status": *status, "amount": amount }),
                        )
                    }
                    None => RemoteResponse::new(404, json!({ "error": "Payment not found" })),
                }
            }
            ("POST", ["payments", id, "cancel"]) => {
                if state.fail_on_cancel {
                    return RemoteResponse::new(502, json!({ "error": "Payment cancel failed" }));
                }
                match state.intents.get_mut(*id) {
                    Some(intent) => {
                        intent.1 = "cancelled";
                        RemoteResponse::new(200, json!({ "id": id, "status": "cancelled" }))
                    }
                    None => RemoteResponse::new(404, json!({ "error": "Payment not found" })),
                }
            }
            _ => RemoteResponse::new(404, json!({ "error": "Not found" })),
        }
    }
}

#[async_trait]
impl RemotePeer for InMemoryPaymentPeer {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, StepError> {
        let delay = self.state.read().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.handle(&request))
    }
}
