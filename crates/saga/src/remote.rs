//! Remote step invocation through per-dependency circuit breakers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use breaker::{BreakerRegistry, CircuitBreaker};

use crate::error::StepError;
use crate::services::peer::{RemotePeer, RemoteRequest, RemoteResponse};

/// Runs `action` through `breaker` and flattens the breaker's error into
/// [`StepError`].
pub async fn through_breaker<F, Fut, T>(breaker: &CircuitBreaker, action: F) -> Result<T, StepError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    breaker.execute(action).await.map_err(StepError::from)
}

/// Sends requests to named peer services.
///
/// Each dependency name maps to one [`RemotePeer`] and, through the shared
/// [`BreakerRegistry`], to one circuit breaker.
#[derive(Clone)]
pub struct RemoteInvoker {
    breakers: BreakerRegistry,
    peers: HashMap<String, Arc<dyn RemotePeer>>,
}

impl RemoteInvoker {
    pub fn new(breakers: BreakerRegistry) -> Self {
        Self {
            breakers,
            peers: HashMap::new(),
        }
    }

    /// Registers the peer serving `dependency`.
    pub fn with_peer(mut self, dependency: impl Into<String>, peer: Arc<dyn RemotePeer>) -> Self {
        self.peers.insert(dependency.into(), peer);
        self
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Sends `request` to `dependency` without breaker protection.
    ///
    /// Non-2xx responses become [`StepError::Remote`]. Meant for saga step
    /// bodies, which the orchestrator already runs through the breaker.
    pub async fn send(
        &self,
        dependency: &str,
        request: RemoteRequest,
    ) -> Result<RemoteResponse, StepError> {
        let peer = self.peers.get(dependency).ok_or_else(|| {
            StepError::transport(format!("no peer registered for '{dependency}'"))
        })?;

        tracing::debug!(
            dependency,
            method = %request.method,
            path = %request.path,
            "sending remote request"
        );
        peer.send(request).await?.error_for_status()
    }
}

impl std::fmt::Debug for RemoteInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut peers: Vec<_> = self.peers.keys().collect();
        peers.sort();
        f.debug_struct("RemoteInvoker")
            .field("peers", &peers)
            .finish_non_exhaustive()
    }
}
