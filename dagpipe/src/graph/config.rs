//! Declarative graph configuration.

use super::{Graph, Node};
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The on-disk shape of a pipeline graph.
///
/// ```yaml
/// nodes:
///   - id: research
///     fn: do_research
///     complexity: 0.3
///   - id: write
///     fn: do_write
///     depends_on: [research]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Node records, in declaration order.
    pub nodes: Vec<Node>,
}

impl GraphConfig {
    /// Parses a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Parse`] if the document does not match
    /// the node schema.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        for node in &mut config.nodes {
            // An empty label means "no schema".
            if node
                .output_schema
                .as_deref()
                .is_some_and(|s| s.trim().is_empty())
            {
                node.output_schema = None;
            }
        }
        Ok(config)
    }

    /// Renders the configuration back to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Parse`] if serialization fails.
    pub fn to_yaml_string(&self) -> Result<String, ConfigurationError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validates and orders the nodes.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn into_graph(self) -> Result<Graph, ConfigurationError> {
        Graph::new(self.nodes)
    }
}

/// Loads a graph configuration from a YAML file.
///
/// # Errors
///
/// Returns [`ConfigurationError::Io`] or [`ConfigurationError::Parse`].
pub fn load_graph(path: &Path) -> Result<GraphConfig, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "Loaded graph configuration");
    GraphConfig::from_yaml_str(&content)
}
