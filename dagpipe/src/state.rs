//! Pipeline state and per-node context.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Index;

/// Context key holding the previous attempt's error text on retries.
pub const LAST_ERROR_KEY: &str = "__last_error__";

static NULL: Value = Value::Null;

/// Returns true for orchestrator-reserved keys of the form `__name__`.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    key.len() > 4 && key.starts_with("__") && key.ends_with("__")
}

/// Accumulated results of a run.
///
/// Holds the values injected at the start of the run and the validated
/// output of every node that has succeeded or been restored. Node outputs
/// are only ever added, never replaced within a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionState {
    injected: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
}

impl ExecutionState {
    /// Creates a state seeded with injected values.
    #[must_use]
    pub fn new(injected: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            injected: injected.into_iter().collect(),
            outputs: BTreeMap::new(),
        }
    }

    /// Looks up a node output, falling back to injected values.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key).or_else(|| self.injected.get(key))
    }

    /// Returns the output of a node.
    #[must_use]
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Node outputs by id.
    #[must_use]
    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    /// Values injected at the start of the run.
    #[must_use]
    pub fn injected(&self) -> &BTreeMap<String, Value> {
        &self.injected
    }

    pub(crate) fn record(&mut self, node_id: &str, output: Value) {
        self.outputs.insert(node_id.to_string(), output);
    }

    /// Flattens injected values and node outputs into one JSON object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self.injected.into_iter().collect();
        map.extend(self.outputs);
        map
    }

    /// Returns the flattened state as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.clone().into_map())
    }
}

impl<'a> Index<&'a str> for ExecutionState {
    type Output = Value;

    /// Returns `Value::Null` for absent keys, like indexing a JSON object.
    fn index(&self, key: &'a str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}

/// The view of the state a node function receives.
///
/// Contains every injected value, the outputs of the node's direct
/// dependencies, and on retries the previous error under
/// [`LAST_ERROR_KEY`]. Outputs of transitive ancestors are not included.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeContext {
    node_id: String,
    attempt: usize,
    values: Map<String, Value>,
}

impl NodeContext {
    /// Creates an empty context for a first attempt.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            attempt: 0,
            values: Map::new(),
        }
    }

    /// Adds a value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Sets the attempt index.
    #[must_use]
    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = attempt;
        self
    }

    pub(crate) fn for_node(
        node_id: &str,
        state: &ExecutionState,
        dependencies: &[String],
        attempt: usize,
        last_error: Option<&str>,
    ) -> Self {
        let mut values: Map<String, Value> = state
            .injected()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for dep in dependencies {
            if let Some(output) = state.output(dep) {
                values.insert(dep.clone(), output.clone());
            }
        }
        if let Some(error) = last_error {
            values.insert(LAST_ERROR_KEY.to_string(), Value::String(error.to_string()));
        }

        Self {
            node_id: node_id.to_string(),
            attempt,
            values,
        }
    }

    /// The node being executed.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Zero-based attempt index.
    #[must_use]
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns true on the first attempt.
    #[must_use]
    pub fn is_first_attempt(&self) -> bool {
        self.attempt == 0
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Looks up a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Looks up a value that the node cannot run without.
    ///
    /// # Errors
    ///
    /// Returns an error naming the node and the missing key.
    pub fn require(&self, key: &str) -> anyhow::Result<&Value> {
        self.get(key).ok_or_else(|| {
            anyhow::anyhow!("node '{}' requires '{key}' in its context", self.node_id)
        })
    }

    /// The error text of the previous attempt, if this is a retry.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.get_str(LAST_ERROR_KEY)
    }

    /// All values visible to the node.
    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state() -> ExecutionState {
        let mut state = ExecutionState::new([("topic".to_string(), json!("DagPipe"))]);
        state.record("a", json!({"v": 1}));
        state.record("b", json!({"v": 2}));
        state
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved_key(LAST_ERROR_KEY));
        assert!(!is_reserved_key("____"));
        assert!(!is_reserved_key("__private"));
        assert!(!is_reserved_key("topic"));
    }

    #[test]
    fn test_state_lookup_and_index() {
        let state = state();
        assert_eq!(state["a"]["v"], 1);
        assert_eq!(state["topic"], "DagPipe");
        assert_eq!(state["missing"], Value::Null);
        assert!(state.output("topic").is_none());
    }

    #[test]
    fn test_into_map_flattens() {
        let map = state().into_map();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&"topic"));
        assert_eq!(map["b"], json!({"v": 2}));
    }

    #[test]
    fn test_context_holds_direct_dependencies_only() {
        let ctx = NodeContext::for_node("c", &state(), &["b".to_string()], 0, None);

        assert_eq!(ctx.get("b"), Some(&json!({"v": 2})));
        assert_eq!(ctx.get("a"), None);
        assert_eq!(ctx.get_str("topic"), Some("DagPipe"));
        assert_eq!(ctx.last_error(), None);
        assert!(ctx.is_first_attempt());
    }

    #[test]
    fn test_context_carries_last_error_on_retry() {
        let ctx = NodeContext::for_node("c", &state(), &[], 2, Some("boom"));
        assert_eq!(ctx.last_error(), Some("boom"));
        assert_eq!(ctx.attempt(), 2);
    }

    #[test]
    fn test_require_names_missing_key() {
        let ctx = NodeContext::new("writer").with_value("x", json!(1));
        assert!(ctx.require("x").is_ok());
        let err = ctx.require("research").unwrap_err();
        assert_eq!(err.to_string(), "node 'writer' requires 'research' in its context");
    }
}
