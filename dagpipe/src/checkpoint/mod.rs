//! Per-node checkpoint persistence.
//!
//! A checkpoint for node `X` is the single source of truth that `X` already
//! succeeded. The orchestrator keeps no other record of completed work, so a
//! re-run against the same store resumes after the last successful node.
//!
//! Reads never fail: a missing or unreadable checkpoint is reported as
//! absent, which simply forces the node to run again. Writes surface
//! [`StorageError`] because losing a checkpoint silently defeats resumption.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use crate::errors::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

/// Default directory for file checkpoints.
pub const DEFAULT_CHECKPOINT_DIR: &str = ".dagpipe/checkpoints";

/// Storage backend for node checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Persists the output of a node, replacing any previous checkpoint.
    async fn save(&self, node_id: &str, output: &serde_json::Value) -> Result<(), StorageError>;

    /// Loads a checkpoint, returning `None` when absent or unreadable.
    async fn load(&self, node_id: &str) -> Option<serde_json::Value>;

    /// Returns true if a checkpoint exists, without reading its payload.
    async fn exists(&self, node_id: &str) -> bool;

    /// Removes every checkpoint.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Returns the ids of all checkpointed nodes in lexicographic order.
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Selects a checkpoint backend from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CheckpointBackend {
    /// One JSON file per node under `dir`.
    File {
        /// Root directory for checkpoint files.
        dir: PathBuf,
    },
    /// Process-local storage; nothing survives the process.
    Memory,
}

impl Default for CheckpointBackend {
    fn default() -> Self {
        Self::File {
            dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
        }
    }
}

impl CheckpointBackend {
    /// Creates a file backend rooted at `dir`.
    #[must_use]
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::File { dir: dir.into() }
    }

    /// Instantiates the configured store.
    #[must_use]
    pub fn build(&self) -> Arc<dyn CheckpointStore> {
        match self {
            Self::File { dir } => Arc::new(FileCheckpointStore::new(dir.clone())),
            Self::Memory => Arc::new(InMemoryCheckpointStore::new()),
        }
    }
}
