//! Error types for the dagpipe orchestrator.
//!
//! Errors are grouped by how the orchestrator reacts to them:
//!
//! - [`ConfigurationError`] is fatal at load time and never retried.
//! - [`ConstrainedError`] is recovered inside the constrained generation
//!   loop until its attempt budget runs out.
//! - Node failures are plain [`anyhow::Error`] values retried by the
//!   orchestrator; exhausting them yields [`RetryExhaustedError`].
//! - [`StorageError`] is only surfaced for writes. Failed reads degrade to
//!   "not checkpointed".

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for dagpipe operations.
#[derive(Debug, Error)]
pub enum DagpipeError {
    /// The graph or settings are invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A checkpoint could not be persisted.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// A node failed on every permitted attempt.
    #[error("{0}")]
    RetryExhausted(#[from] RetryExhaustedError),

    /// Constrained generation gave up.
    ///
    /// The orchestrator never produces this variant itself: node functions
    /// report failures as [`anyhow::Error`]. It is the `?` target for
    /// application code that calls a generator outside of a node.
    #[error("{0}")]
    Constrained(#[from] ConstrainedError),
}

impl DagpipeError {
    /// Returns a stable error code for logs and events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(err) => err.code(),
            Self::Storage(_) => "DAG-100-STORAGE",
            Self::RetryExhausted(_) => "DAG-200-RETRY_EXHAUSTED",
            Self::Constrained(_) => "DAG-300-CONSTRAINED",
        }
    }

    /// Converts to a JSON payload suitable for event sinks.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Self::RetryExhausted(err) = self {
            payload["node"] = serde_json::json!(err.node);
            payload["attempts"] = serde_json::json!(err.attempts);
            payload["last_error"] = serde_json::json!(err.last_error);
        }
        payload
    }
}

/// Errors raised while loading or validating a pipeline definition.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The dependency graph contains a cycle.
    #[error("Cycle detected involving node '{node}': {}", path.join(" -> "))]
    CycleDetected {
        /// The node that was re-entered while still being visited.
        node: String,
        /// The traversal path that closed the cycle.
        path: Vec<String>,
    },

    /// A node depends on an id that is not part of the graph.
    #[error("Node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency {
        /// The declaring node.
        node: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// Two nodes share an id.
    #[error("Duplicate node id '{id}'")]
    DuplicateNode {
        /// The duplicated id.
        id: String,
    },

    /// A node id cannot be used as a checkpoint key.
    #[error("Invalid node id '{id}': {reason}")]
    InvalidNodeId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A complexity score outside `[0.0, 1.0]`.
    #[error("Node '{node}' has complexity {complexity}, expected a value in [0.0, 1.0]")]
    InvalidComplexity {
        /// The node id.
        node: String,
        /// The rejected score.
        complexity: f64,
    },

    /// A node references a function missing from the registry.
    #[error("Node '{node}' references function '{function}' which is not in the node registry")]
    UnknownFunction {
        /// The node id.
        node: String,
        /// The unresolved function name.
        function: String,
    },

    /// A node references a schema label missing from the schema registry.
    #[error("Node '{node}' references output schema '{schema}' which is not registered")]
    UnknownSchema {
        /// The node id.
        node: String,
        /// The unresolved schema label.
        schema: String,
    },

    /// An injected state key shadows a node id or a reserved key.
    #[error("Injected state key '{key}' collides with {reason}")]
    StateKeyCollision {
        /// The offending key.
        key: String,
        /// What it collides with.
        reason: String,
    },

    /// A setting could not be parsed.
    #[error("Invalid setting {key}={value:?}: {reason}")]
    InvalidSetting {
        /// The setting name.
        key: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The graph configuration is not valid YAML for the node schema.
    #[error("Graph configuration parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The graph configuration file could not be read.
    #[error("Failed to read graph configuration {}: {source}", path.display())]
    Io {
        /// The configuration path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigurationError {
    /// Returns a stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::CycleDetected { .. } => "DAG-001-CYCLE",
            Self::UnknownDependency { .. } => "DAG-002-MISSING_DEP",
            Self::DuplicateNode { .. } => "DAG-003-DUPLICATE",
            Self::InvalidNodeId { .. } => "DAG-004-INVALID_ID",
            Self::InvalidComplexity { .. } => "DAG-005-COMPLEXITY",
            Self::UnknownFunction { .. } => "DAG-006-UNKNOWN_FN",
            Self::UnknownSchema { .. } => "DAG-007-UNKNOWN_SCHEMA",
            Self::StateKeyCollision { .. } => "DAG-008-STATE_KEY",
            Self::InvalidSetting { .. } => "DAG-009-SETTING",
            Self::Parse(_) => "DAG-010-PARSE",
            Self::Io { .. } => "DAG-011-IO",
        }
    }

    /// Returns a hint for fixing the error, when one applies.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&'static str> {
        match self {
            Self::CycleDetected { .. } => {
                Some("Remove one of the dependencies in the cycle to break it.")
            }
            Self::UnknownDependency { .. } => Some(
                "Ensure every depends_on entry names a node in the graph. Check for typos.",
            ),
            Self::DuplicateNode { .. } => Some("Give every node a unique id."),
            Self::InvalidNodeId { .. } => Some(
                "Node ids become checkpoint file names: use letters, digits, '-', '_' and '.'.",
            ),
            Self::UnknownFunction { .. } => {
                Some("Register the function in the NodeRegistry before building the orchestrator.")
            }
            Self::UnknownSchema { .. } => {
                Some("Register the schema in the SchemaRegistry or drop the output_schema label.")
            }
            Self::StateKeyCollision { .. } => {
                Some("Rename the injected key; node ids and '__'-wrapped keys are reserved.")
            }
            _ => None,
        }
    }
}

/// Errors raised while persisting checkpoints.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The checkpoint payload could not be serialized.
    #[error("Failed to serialize checkpoint for node '{node}': {source}")]
    Serialize {
        /// The node id.
        node: String,
        /// The serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The checkpoint file could not be written.
    #[error("Failed to write checkpoint for node '{node}' at {}: {source}", path.display())]
    Write {
        /// The node id.
        node: String,
        /// The target path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint directory could not be cleared.
    #[error("Failed to clear checkpoints in {}: {source}", path.display())]
    Clear {
        /// The checkpoint root.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint directory could not be listed.
    #[error("Failed to list checkpoints in {}: {source}", path.display())]
    List {
        /// The checkpoint root.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Raised when a node fails on every permitted attempt.
#[derive(Debug, Clone, Error)]
#[error("Pipeline failed at node '{node}' after {attempts} attempts. Last error: {last_error}")]
pub struct RetryExhaustedError {
    /// The failing node.
    pub node: String,
    /// Number of attempts made.
    pub attempts: usize,
    /// Text of the last failure.
    pub last_error: String,
}

impl RetryExhaustedError {
    /// Creates a new retry exhausted error.
    #[must_use]
    pub fn new(node: impl Into<String>, attempts: usize, last_error: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            attempts,
            last_error: last_error.into(),
        }
    }
}

/// Failures reported by a generative provider.
///
/// The display text of each variant carries the marker phrases the router
/// uses to recognise transient provider trouble.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider rejected the call because of quota.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// The provider rejected the credentials.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The provider API returned an error.
    #[error("APIError: {0}")]
    Api(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Creates a generic provider error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Errors raised by the constrained generation protocol.
#[derive(Debug, Error)]
pub enum ConstrainedError {
    /// Every attempt produced output that failed validation.
    #[error("Constrained generation failed after {attempts} attempts. Last error: {last_error}")]
    Exhausted {
        /// Total provider calls made.
        attempts: usize,
        /// Text of the last validation failure.
        last_error: String,
    },

    /// The provider call itself failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// The target schema could not be rendered into an instruction.
    #[error("Failed to render output schema: {0}")]
    Schema(#[source] serde_json::Error),
}
