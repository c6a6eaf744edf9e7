//! In-process stand-in for the project service's HTTP endpoints.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::RecordId;
use serde_json::{Map, Value, json};

use crate::error::{StepError, StoreError};
use crate::services::peer::{RemotePeer, RemoteRequest, RemoteResponse};
use crate::services::store::RecordStore;

#[derive(Debug, Default)]
struct LocalProjectState {
    unavailable: bool,
    requests: Vec<RemoteRequest>,
}

/// Answers `GET /projects/{id}` and `PUT /projects/{id}/payment-status`
/// straight from a project [`RecordStore`].
///
/// Used when the project service runs in the same process as the payment
/// sagas that call it.
#[derive(Clone)]
pub struct LocalProjectPeer {
    projects: Arc<dyn RecordStore>,
    state: Arc<RwLock<LocalProjectState>>,
}

impl LocalProjectPeer {
    pub fn new(projects: Arc<dyn RecordStore>) -> Self {
        Self {
            projects,
            state: Arc::new(RwLock::new(LocalProjectState::default())),
        }
    }

    /// Configures the peer to answer 503 to everything.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unwrap().unavailable = unavailable;
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.state.read().unwrap().requests.clone()
    }

    async fn handle(&self, request: &RemoteRequest) -> RemoteResponse {
        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["projects", id]) => {
                let Ok(id) = id.parse::<RecordId>() else {
                    return not_found();
                };
                match self.projects.find_by_id(id).await {
                    Ok(Some(project)) => RemoteResponse::new(200, json!(project)),
                    Ok(None) => not_found(),
                    Err(e) => store_failure(e),
                }
            }
            ("PUT", ["projects", id, "payment-status"]) => {
                let Ok(id) = id.parse::<RecordId>() else {
                    return not_found();
                };
                let body = request.body.clone().unwrap_or(Value::Null);
                let Some(status) = body.get("paymentStatus").and_then(Value::as_str) else {
                    return RemoteResponse::new(400, json!({ "error": "paymentStatus is required" }));
                };

                let mut fields = Map::new();
                fields.insert("paymentStatus".to_string(), json!(status));
                if let Some(payment_id) = body.get("paymentId").filter(|v| !v.is_null()) {
                    fields.insert("paymentId".to_string(), payment_id.clone());
                }
                match self.projects.update(id, fields).await {
                    Ok(project) => RemoteResponse::new(200, json!(project)),
                    Err(e) => store_failure(e),
                }
            }
            _ => RemoteResponse::new(404, json!({ "error": "Not found" })),
        }
    }
}

fn not_found() -> RemoteResponse {
    RemoteResponse::new(404, json!({ "error": "Project not found" }))
}

fn store_failure(err: StoreError) -> RemoteResponse {
    match err {
        StoreError::NotFound(_) => not_found(),
        StoreError::Unavailable(_) => {
            RemoteResponse::new(503, json!({ "error": err.to_string() }))
        }
    }
}

#[async_trait]
impl RemotePeer for LocalProjectPeer {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, StepError> {
        let unavailable = {
            let mut state = self.state.write().unwrap();
            state.requests.push(request.clone());
            state.unavailable
        };
        if unavailable {
            return Ok(RemoteResponse::new(
                503,
                json!({ "error": "Project service unavailable" }),
            ));
        }
        Ok(self.handle(&request).await)
    }
}

impl std::fmt::Debug for LocalProjectPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProjectPeer").finish_non_exhaustive()
    }
}
