//! One breaker per dependency name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::breaker::{BreakerSnapshot, CircuitBreaker, TransitionListener};
use crate::config::BreakerConfig;

#[derive(Default)]
struct RegistryState {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    overrides: HashMap<String, BreakerConfig>,
    listener: Option<Arc<dyn TransitionListener>>,
}

/// The creation point for circuit breakers.
///
/// Every lookup of the same dependency name returns the same shared
/// [`CircuitBreaker`], so failures observed by one caller protect all others.
/// Cloning the registry clones a handle, not the breakers.
#[derive(Clone)]
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    state: Arc<RwLock<RegistryState>>,
}

impl BreakerRegistry {
    /// Creates an empty registry using `default_config` for unknown dependencies.
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Uses `config` for `dependency` instead of the default.
    ///
    /// Only affects breakers created after this call.
    pub fn with_config(self, dependency: impl Into<String>, config: BreakerConfig) -> Self {
        self.write().overrides.insert(dependency.into(), config);
        self
    }

    /// Attaches a transition listener to every breaker created afterwards.
    pub fn with_listener(self, listener: Arc<dyn TransitionListener>) -> Self {
        self.write().listener = Some(listener);
        self
    }

    /// Returns the breaker for `dependency`, creating it on first use.
    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(dependency) {
            return breaker;
        }

        let mut state = self.write();
        let config = state
            .overrides
            .get(dependency)
            .copied()
            .unwrap_or(self.default_config);
        let listener = state.listener.clone();
        state
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                tracing::debug!(%dependency, ?config, "creating circuit breaker");
                let breaker = CircuitBreaker::new(dependency, config);
                Arc::new(match listener {
                    Some(listener) => breaker.with_listener(listener),
                    None => breaker,
                })
            })
            .clone()
    }

    /// Returns the breaker for `dependency` if one has been created.
    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.read().breakers.get(dependency).cloned()
    }

    /// Snapshots of every breaker, ordered by dependency name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .read()
            .breakers
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }

    /// Closes every breaker and clears its counters.
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.read().breakers.values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.read().breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
