//! File-backed checkpoint store.

use super::CheckpointStore;
use crate::errors::StorageError;
use crate::graph::validate_node_id;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

/// Stores each checkpoint as `<root>/<node_id>.json`.
///
/// Payloads are written to a hidden temporary file in the same directory and
/// renamed into place, so readers see either the old record or the new one.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the checkpoint file for a node.
    #[must_use]
    pub fn path_for(&self, node_id: &str) -> PathBuf {
        self.root.join(format!("{node_id}.{EXTENSION}"))
    }

    fn temp_path_for(&self, node_id: &str) -> PathBuf {
        self.root.join(format!(".{node_id}.{EXTENSION}.tmp"))
    }

    fn write_error(&self, node_id: &str, source: io::Error) -> StorageError {
        StorageError::Write {
            node: node_id.to_string(),
            path: self.path_for(node_id),
            source,
        }
    }
}

fn checkpoint_id(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, node_id: &str, output: &serde_json::Value) -> Result<(), StorageError> {
        if let Err(err) = validate_node_id(node_id) {
            return Err(self.write_error(
                node_id,
                io::Error::new(io::ErrorKind::InvalidInput, err.to_string()),
            ));
        }

        let payload =
            serde_json::to_vec_pretty(output).map_err(|source| StorageError::Serialize {
                node: node_id.to_string(),
                source,
            })?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| self.write_error(node_id, e))?;

        let temp = self.temp_path_for(node_id);
        tokio::fs::write(&temp, &payload)
            .await
            .map_err(|e| self.write_error(node_id, e))?;

        if let Err(e) = tokio::fs::rename(&temp, self.path_for(node_id)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.write_error(node_id, e));
        }

        tracing::debug!(node = node_id, bytes = payload.len(), "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, node_id: &str) -> Option<serde_json::Value> {
        if validate_node_id(node_id).is_err() {
            return None;
        }

        let path = self.path_for(node_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    node = node_id,
                    path = %path.display(),
                    error = %e,
                    "Unreadable checkpoint, treating as absent"
                );
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    node = node_id,
                    path = %path.display(),
                    error = %e,
                    "Corrupt checkpoint, treating as absent"
                );
                None
            }
        }
    }

    async fn exists(&self, node_id: &str) -> bool {
        if validate_node_id(node_id).is_err() {
            return false;
        }
        tokio::fs::metadata(self.path_for(node_id))
            .await
            .is_ok_and(|m| m.is_file())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let clear_error = |source| StorageError::Clear {
            path: self.root.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(clear_error(e)),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await.map_err(clear_error)? {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"));
            if checkpoint_id(&path).is_some() || is_temp {
                tokio::fs::remove_file(&path).await.map_err(clear_error)?;
                removed += 1;
            }
        }

        tracing::info!(root = %self.root.display(), removed, "Cleared checkpoints");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let list_error = |source| StorageError::List {
            path: self.root.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_error(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
            if let Some(id) = checkpoint_id(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
