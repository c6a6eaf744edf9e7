//! Observability sinks for saga and breaker events.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use breaker::{BreakerState, TransitionListener};
use chrono::{DateTime, Utc};
use common::SagaId;
use serde::Serialize;
use serde_json::Value;

/// Receives fire-and-forget notifications from the orchestrator.
///
/// Methods are synchronous and must not block; they are never on the path
/// that decides a saga's outcome.
pub trait Monitor: Send + Sync {
    fn record_event(&self, kind: &str, metadata: Value);

    fn record_saga_start(&self, saga_id: SagaId, saga_type: &str);

    fn record_saga_success(&self, saga_id: SagaId, saga_type: &str);

    fn record_saga_failure(&self, saga_id: SagaId, saga_type: &str);
}

/// Forwards notifications to the `metrics` facade and the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsMonitor;

impl Monitor for MetricsMonitor {
    fn record_event(&self, kind: &str, metadata: Value) {
        metrics::counter!("saga_monitor_events_total", "kind" => kind.to_string()).increment(1);
        tracing::info!(event = kind, %metadata, "monitor event");
    }

    fn record_saga_start(&self, saga_id: SagaId, saga_type: &str) {
        metrics::counter!("saga_monitor_started_total", "saga" => saga_type.to_string())
            .increment(1);
        tracing::info!(%saga_id, saga_type, "saga started");
    }

    fn record_saga_success(&self, saga_id: SagaId, saga_type: &str) {
        metrics::counter!("saga_monitor_succeeded_total", "saga" => saga_type.to_string())
            .increment(1);
        tracing::info!(%saga_id, saga_type, "saga succeeded");
    }

    fn record_saga_failure(&self, saga_id: SagaId, saga_type: &str) {
        metrics::counter!("saga_monitor_failed_total", "saga" => saga_type.to_string())
            .increment(1);
        tracing::warn!(%saga_id, saga_type, "saga failed");
    }
}

/// Fans every notification out to several monitors, in order.
#[derive(Clone, Default)]
pub struct MonitorSet {
    monitors: Vec<Arc<dyn Monitor>>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

impl Monitor for MonitorSet {
    fn record_event(&self, kind: &str, metadata: Value) {
        for monitor in &self.monitors {
            monitor.record_event(kind, metadata.clone());
        }
    }

    fn record_saga_start(&self, saga_id: SagaId, saga_type: &str) {
        for monitor in &self.monitors {
            monitor.record_saga_start(saga_id, saga_type);
        }
    }

    fn record_saga_success(&self, saga_id: SagaId, saga_type: &str) {
        for monitor in &self.monitors {
            monitor.record_saga_success(saga_id, saga_type);
        }
    }

    fn record_saga_failure(&self, saga_id: SagaId, saga_type: &str) {
        for monitor in &self.monitors {
            monitor.record_saga_failure(saga_id, saga_type);
        }
    }
}

/// A recorded monitor event.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub kind: String,
    pub metadata: Value,
    pub at: DateTime<Utc>,
}

/// Aggregated counters exposed by [`InMemoryMonitor::summary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSummary {
    pub sagas_started: u64,
    pub sagas_completed: u64,
    pub sagas_failed: u64,
    pub events: BTreeMap<String, u64>,
    pub circuit_breakers: BTreeMap<String, BreakerState>,
}

#[derive(Debug, Default)]
struct MonitorState {
    summary: MonitorSummary,
    recent_events: Vec<MonitorEvent>,
}

/// Keeps counters and the most recent events in memory.
///
/// Also listens to breaker transitions so the current state of every
/// dependency is part of the summary.
#[derive(Debug, Clone)]
pub struct InMemoryMonitor {
    state: Arc<RwLock<MonitorState>>,
    max_events: usize,
}

impl InMemoryMonitor {
    /// Creates a monitor keeping at most `max_events` recent events.
    pub fn new(max_events: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState::default())),
            max_events,
        }
    }

    pub fn summary(&self) -> MonitorSummary {
        self.read().summary.clone()
    }

    /// Recent events, oldest first.
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.read().recent_events.clone()
    }

    /// Number of recorded events of `kind`.
    pub fn event_count(&self, kind: &str) -> u64 {
        self.read().summary.events.get(kind).copied().unwrap_or(0)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MonitorState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut MonitorState)) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }
}

impl Default for InMemoryMonitor {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Monitor for InMemoryMonitor {
    fn record_event(&self, kind: &str, metadata: Value) {
        let max_events = self.max_events;
        self.update(|state| {
            *state.summary.events.entry(kind.to_string()).or_default() += 1;
            state.recent_events.push(MonitorEvent {
                kind: kind.to_string(),
                metadata,
                at: Utc::now(),
            });
            if state.recent_events.len() > max_events {
                let excess = state.recent_events.len() - max_events;
                state.recent_events.drain(..excess);
            }
        });
    }

    fn record_saga_start(&self, _saga_id: SagaId, _saga_type: &str) {
        self.update(|state| state.summary.sagas_started += 1);
    }

    fn record_saga_success(&self, _saga_id: SagaId, _saga_type: &str) {
        self.update(|state| state.summary.sagas_completed += 1);
    }

    fn record_saga_failure(&self, _saga_id: SagaId, _saga_type: &str) {
        self.update(|state| state.summary.sagas_failed += 1);
    }
}

impl TransitionListener for InMemoryMonitor {
    fn on_transition(&self, dependency: &str, _from: BreakerState, to: BreakerState) {
        self.update(|state| {
            state
                .summary
                .circuit_breakers
                .insert(dependency.to_string(), to);
        });
    }
}
