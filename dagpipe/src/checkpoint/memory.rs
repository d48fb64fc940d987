//! In-memory checkpoint store.

use super::CheckpointStore;
use crate::errors::StorageError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Keeps checkpoints in process memory.
///
/// Clones share the same entries, so two orchestrators built from clones of
/// one store behave like two processes sharing a checkpoint directory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    entries: Arc<Mutex<BTreeMap<String, serde_json::Value>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if there are no checkpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, node_id: &str, output: &serde_json::Value) -> Result<(), StorageError> {
        self.entries.lock().insert(node_id.to_string(), output.clone());
        Ok(())
    }

    async fn load(&self, node_id: &str) -> Option<serde_json::Value> {
        self.entries.lock().get(node_id).cloned()
    }

    async fn exists(&self, node_id: &str) -> bool {
        self.entries.lock().contains_key(node_id)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}
