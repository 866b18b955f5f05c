//! Saga checkpoint storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use voltfleet_core::SagaId;

use super::state::SagaState;

#[derive(Debug, Clone, Error)]
pub enum SagaStoreError {
    #[error("saga store unavailable: {0}")]
    Unavailable(String),

    /// A checkpoint exists but cannot be (de)serialized. Unlike an outage
    /// this does not heal on retry; it needs manual intervention.
    #[error("saga checkpoint serialization failed: {0}")]
    Serialization(String),
}

/// Durable store for saga checkpoints, keyed by saga id.
///
/// One checkpoint per saga: `save` overwrites the previous state. Writes are
/// expected to be small and fast; the orchestrator bounds them with a timeout
/// and continues on failure, so an implementation should never block
/// indefinitely.
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError>;

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaState>, SagaStoreError>;

    async fn delete(&self, saga_id: SagaId) -> Result<(), SagaStoreError>;
}

#[async_trait]
impl<K> SagaStateStore for Arc<K>
where
    K: SagaStateStore + ?Sized,
{
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        (**self).save(state).await
    }

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaState>, SagaStoreError> {
        (**self).load(saga_id).await
    }

    async fn delete(&self, saga_id: SagaId) -> Result<(), SagaStoreError> {
        (**self).delete(saga_id).await
    }
}

/// In-memory checkpoint store for tests/dev.
///
/// Stores checkpoints in their serialized form, the same way a durable
/// backend would, so decode failures surface here too.
#[derive(Debug, Default)]
pub struct InMemorySagaStateStore {
    checkpoints: RwLock<HashMap<SagaId, String>>,
}

impl InMemorySagaStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw serialized checkpoint, bypassing serialization.
    #[cfg(test)]
    pub async fn put_raw(&self, saga_id: SagaId, raw: impl Into<String>) {
        self.checkpoints.write().await.insert(saga_id, raw.into());
    }
}

#[async_trait]
impl SagaStateStore for InMemorySagaStateStore {
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        let raw = serde_json::to_string(state)
            .map_err(|e| SagaStoreError::Serialization(e.to_string()))?;
        self.checkpoints.write().await.insert(state.saga_id, raw);
        Ok(())
    }

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaState>, SagaStoreError> {
        let checkpoints = self.checkpoints.read().await;
        match checkpoints.get(&saga_id) {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| SagaStoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn delete(&self, saga_id: SagaId) -> Result<(), SagaStoreError> {
        self.checkpoints.write().await.remove(&saga_id);
        Ok(())
    }
}
