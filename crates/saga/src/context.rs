//! Saga context: the state accumulated by successive steps.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StepError;

/// A JSON object threaded through a saga.
///
/// Each forward step returns a patch that is merged key-by-key into the
/// running context, so later steps (and compensations) see identifiers
/// produced by earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaContext(Map<String, Value>);

impl SagaContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from a JSON object; any other value is rejected.
    pub fn from_value(value: Value) -> Result<Self, StepError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StepError::failed(format!(
                "saga context must be a JSON object, got {other}"
            ))),
        }
    }

    /// Adds a key, returning the context for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns a string value, failing the step if it is missing.
    pub fn require_str(&self, key: &str) -> Result<&str, StepError> {
        self.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::failed(format!("context key '{key}' missing or not a string")))
    }

    /// Deserializes a value, failing the step if it is missing or malformed.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, StepError> {
        let value = self
            .get(key)
            .ok_or_else(|| StepError::failed(format!("context key '{key}' missing")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| StepError::failed(format!("context key '{key}' malformed: {e}")))
    }

    /// Merges `patch` into this context; keys in `patch` win.
    pub fn merge(&mut self, patch: SagaContext) {
        self.0.extend(patch.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for SagaContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
