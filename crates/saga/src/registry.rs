//! In-flight and recently finished saga instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::SagaId;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::events::SagaEvent;
use crate::instance::SagaInstance;
use crate::state::SagaStatus;

/// How long finished instances are kept by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Instance counts, for monitoring endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryMetrics {
    pub active: usize,
    pub recent: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    active: HashMap<SagaId, SagaInstance>,
    recent: HashMap<SagaId, (Instant, SagaInstance)>,
}

/// Bookkeeping of saga instances for lookup and observability.
///
/// Purely observational: nothing here influences how a saga runs. Finished
/// instances move from the active set to the recent set and are evicted once
/// they are older than the retention window.
#[derive(Debug, Clone)]
pub struct SagaRegistry {
    retention: Duration,
    state: Arc<RwLock<RegistryState>>,
}

impl SagaRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Tracks a new instance.
    pub async fn register(&self, instance: SagaInstance) {
        let mut state = self.state.write().await;
        state.active.insert(instance.id(), instance);
    }

    /// Moves an active instance to `status`. Returns false when the saga is
    /// unknown or the transition is not allowed from its current status.
    pub async fn update(&self, id: SagaId, status: SagaStatus) -> bool {
        self.modify(id, |instance| instance.set_status(status))
            .await
            .unwrap_or(false)
    }

    /// Folds a lifecycle event into an instance.
    pub async fn apply(&self, id: SagaId, event: SagaEvent) {
        self.modify(id, |instance| instance.apply(event)).await;
    }

    /// Looks up an instance, active or recent.
    pub async fn get(&self, id: SagaId) -> Option<SagaInstance> {
        let state = self.state.read().await;
        state
            .active
            .get(&id)
            .or_else(|| state.recent.get(&id).map(|(_, instance)| instance))
            .cloned()
    }

    /// Instances still running, oldest first.
    pub async fn list_active(&self) -> Vec<SagaInstance> {
        let mut active: Vec<_> = self.state.read().await.active.values().cloned().collect();
        active.sort_by_key(|instance| instance.started_at());
        active
    }

    /// Finished instances within the retention window, most recent first.
    pub async fn list_recent(&self) -> Vec<SagaInstance> {
        let mut state = self.state.write().await;
        self.evict(&mut state);
        let mut recent: Vec<_> = state.recent.values().cloned().collect();
        recent.sort_by(|(a, _), (b, _)| b.cmp(a));
        recent.into_iter().map(|(_, instance)| instance).collect()
    }

    pub async fn metrics(&self) -> RegistryMetrics {
        let state = self.state.read().await;
        RegistryMetrics {
            active: state.active.len(),
            recent: state.recent.len(),
        }
    }

    /// Drops finished instances older than the retention window.
    pub async fn evict_expired(&self) -> usize {
        let mut state = self.state.write().await;
        self.evict(&mut state)
    }

    /// Forgets every instance.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.active.clear();
        state.recent.clear();
    }

    async fn modify<T>(&self, id: SagaId, f: impl FnOnce(&mut SagaInstance) -> T) -> Option<T> {
        let mut state = self.state.write().await;
        let Some(instance) = state.active.get_mut(&id) else {
            tracing::debug!(saga_id = %id, "registry update for unknown saga ignored");
            return None;
        };
        let result = f(instance);

        if instance.status().is_terminal()
            && let Some(instance) = state.active.remove(&id)
        {
            state.recent.insert(id, (Instant::now(), instance));
            self.evict(&mut state);
        }
        Some(result)
    }

    fn evict(&self, state: &mut RegistryState) -> usize {
        let before = state.recent.len();
        let retention = self.retention;
        state
            .recent
            .retain(|_, (finished, _)| finished.elapsed() < retention);
        let evicted = before - state.recent.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted finished sagas");
        }
        evicted
    }
}

impl Default for SagaRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
