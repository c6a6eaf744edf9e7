//! Domain record store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::RecordId;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// A stored entity: its ID plus current field values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }
}

/// CRUD access to one kind of domain record, used by local saga steps.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates a record with the given fields.
    async fn create(&self, fields: Map<String, Value>) -> Result<Record, StoreError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>, StoreError>;

    /// Merges `fields` into an existing record and returns its new state.
    async fn update(&self, id: RecordId, fields: Map<String, Value>) -> Result<Record, StoreError>;

    async fn destroy(&self, id: RecordId) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    records: HashMap<RecordId, Record>,
    fail_on_create: bool,
    fail_on_update: bool,
}

/// In-memory record store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    state: Arc<RwLock<InMemoryStoreState>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail every create call.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Configures the store to fail every update call.
    pub async fn set_fail_on_update(&self, fail: bool) {
        self.state.write().await.fail_on_update = fail;
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, fields: Map<String, Value>) -> Result<Record, StoreError> {
        let mut state = self.state.write().await;
        if state.fail_on_create {
            return Err(StoreError::Unavailable("create rejected".to_string()));
        }

        let now = Utc::now();
        let record = Record {
            id: RecordId::new(),
            fields,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>, StoreError> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn update(&self, id: RecordId, fields: Map<String, Value>) -> Result<Record, StoreError> {
        let mut state = self.state.write().await;
        if state.fail_on_update {
            return Err(StoreError::Unavailable("update rejected".to_string()));
        }

        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.fields.extend(fields);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn destroy(&self, id: RecordId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
