//! Pipeline graph definition and dependency ordering.
//!
//! A [`Graph`] is built once from a set of [`Node`] declarations, validated,
//! and topologically sorted. It is never mutated afterwards.

mod config;

pub use config::{load_graph, GraphConfig};

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Complexity assigned to nodes that do not declare one.
pub const DEFAULT_COMPLEXITY: f64 = 0.5;

const fn default_complexity() -> f64 {
    DEFAULT_COMPLEXITY
}

/// A single unit of work in the pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier, also used as the checkpoint key.
    pub id: String,
    /// Registry key of the function that executes this node.
    #[serde(rename = "fn")]
    pub function: String,
    /// Ids of nodes that must complete before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional label of the schema the output must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<String>,
    /// Difficulty estimate in `[0.0, 1.0]` used for provider routing.
    #[serde(default = "default_complexity")]
    pub complexity: f64,
    /// Deterministic nodes never receive a provider.
    #[serde(default)]
    pub is_deterministic: bool,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

impl Node {
    /// Creates a node with default settings.
    #[must_use]
    pub fn new(id: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            depends_on: Vec::new(),
            output_schema: None,
            complexity: DEFAULT_COMPLEXITY,
            is_deterministic: false,
            description: String::new(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
        self
    }

    /// Sets the dependencies, keeping declaration order and dropping repeats.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.clear();
        for dep in deps {
            self = self.with_dependency(dep);
        }
        self
    }

    /// Sets the complexity score.
    #[must_use]
    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = complexity;
        self
    }

    /// Marks the node as deterministic.
    #[must_use]
    pub fn deterministic(mut self) -> Self {
        self.is_deterministic = true;
        self
    }

    /// Sets the output schema label.
    #[must_use]
    pub fn with_output_schema(mut self, schema: impl Into<String>) -> Self {
        self.output_schema = Some(schema.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Validates the node in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for unusable ids, out-of-range complexity, or a
    /// self-dependency.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_node_id(&self.id)?;

        if !(0.0..=1.0).contains(&self.complexity) {
            return Err(ConfigurationError::InvalidComplexity {
                node: self.id.clone(),
                complexity: self.complexity,
            });
        }

        if self.depends_on.contains(&self.id) {
            return Err(ConfigurationError::CycleDetected {
                node: self.id.clone(),
                path: vec![self.id.clone(), self.id.clone()],
            });
        }

        Ok(())
    }
}

/// Checks that an id is usable both as a state key and as a file name.
///
/// # Errors
///
/// Returns [`ConfigurationError::InvalidNodeId`] describing the problem.
pub fn validate_node_id(id: &str) -> Result<(), ConfigurationError> {
    let reject = |reason: &str| {
        Err(ConfigurationError::InvalidNodeId {
            id: id.to_string(),
            reason: reason.to_string(),
        })
    };

    if id.trim().is_empty() {
        return reject("id cannot be empty");
    }
    if id.starts_with('.') {
        return reject("id cannot start with '.'");
    }
    if id.starts_with("__") {
        return reject("ids starting with '__' are reserved");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return reject("only ASCII letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}

/// A validated, topologically ordered set of nodes.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
}

impl Graph {
    /// Validates the nodes and computes the execution order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] on invalid nodes, duplicate ids,
    /// unknown dependencies, or cycles.
    pub fn new(nodes: Vec<Node>) -> Result<Self, ConfigurationError> {
        for node in &nodes {
            node.validate()?;
        }

        let order = topological_sort(&nodes)?;
        let nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        Ok(Self { nodes, order })
    }

    /// Parses a YAML graph definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the graph is invalid.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        GraphConfig::from_yaml_str(yaml)?.into_graph()
    }

    /// Loads a YAML graph definition from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the graph is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        load_graph(path)?.into_graph()
    }

    /// Returns the node ids in execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    /// Iterates nodes in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns true if the graph contains the id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Orders nodes so that every node follows all of its dependencies.
///
/// Depth-first traversal starting from each node in input order. Independent
/// roots keep their relative input order.
///
/// # Errors
///
/// Returns [`ConfigurationError::DuplicateNode`],
/// [`ConfigurationError::UnknownDependency`] or
/// [`ConfigurationError::CycleDetected`].
pub fn topological_sort(nodes: &[Node]) -> Result<Vec<String>, ConfigurationError> {
    let mut by_id: HashMap<&str, &Node> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if by_id.insert(node.id.as_str(), node).is_some() {
            return Err(ConfigurationError::DuplicateNode {
                id: node.id.clone(),
            });
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut visiting: Vec<&str> = Vec::new();

    for node in nodes {
        visit(&node.id, None, &by_id, &mut visited, &mut visiting, &mut order)?;
    }

    Ok(order)
}

/// Depth-first visit that appends `id` after all of its dependencies.
fn visit<'a>(
    id: &'a str,
    parent: Option<&str>,
    by_id: &HashMap<&'a str, &'a Node>,
    visited: &mut HashSet<&'a str>,
    visiting: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<(), ConfigurationError> {
    if let Some(pos) = visiting.iter().position(|v| *v == id) {
        let mut path: Vec<String> = visiting[pos..]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        path.push(id.to_string());
        return Err(ConfigurationError::CycleDetected {
            node: id.to_string(),
            path,
        });
    }
    if visited.contains(id) {
        return Ok(());
    }

    let Some(&node) = by_id.get(id) else {
        return Err(ConfigurationError::UnknownDependency {
            node: parent.unwrap_or(id).to_string(),
            dependency: id.to_string(),
        });
    };

    visiting.push(node.id.as_str());
    for dep in &node.depends_on {
        visit(dep, Some(node.id.as_str()), by_id, visited, visiting, order)?;
    }
    visiting.pop();

    visited.insert(node.id.as_str());
    order.push(node.id.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|n| n == id).unwrap()
    }

    #[test]
    fn test_sort_places_dependencies_first() {
        let nodes = vec![
            Node::new("write", "f").with_dependency("research"),
            Node::new("research", "f"),
        ];

        let order = topological_sort(&nodes).unwrap();
        assert!(position(&order, "research") < position(&order, "write"));
    }

    #[test]
    fn test_sort_diamond_visits_shared_ancestor_once() {
        let nodes = vec![
            Node::new("d", "f").with_dependencies(["b", "c"]),
            Node::new("b", "f").with_dependency("a"),
            Node::new("c", "f").with_dependency("a"),
            Node::new("a", "f"),
        ];

        let order = topological_sort(&nodes).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_sort_keeps_independent_roots_in_input_order() {
        let nodes = vec![Node::new("z", "f"), Node::new("m", "f"), Node::new("a", "f")];
        assert_eq!(topological_sort(&nodes).unwrap(), vec!["z", "m", "a"]);
    }

    #[test]
    fn test_sort_detects_two_node_cycle() {
        let nodes = vec![
            Node::new("a", "f").with_dependency("b"),
            Node::new("b", "f").with_dependency("a"),
        ];

        let err = topological_sort(&nodes).unwrap_err();
        match err {
            ConfigurationError::CycleDetected { node, path } => {
                assert!(node == "a" || node == "b");
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_detects_long_cycle_behind_valid_prefix() {
        let nodes = vec![
            Node::new("root", "f"),
            Node::new("a", "f").with_dependencies(["root", "c"]),
            Node::new("b", "f").with_dependency("a"),
            Node::new("c", "f").with_dependency("b"),
        ];

        let err = topological_sort(&nodes).unwrap_err();
        assert!(err.to_string().contains("Cycle detected"));
        assert!(err.to_string().contains("a -> c -> b -> a"));
    }

    #[test]
    fn test_sort_rejects_unknown_dependency() {
        let nodes = vec![Node::new("a", "f").with_dependency("ghost")];

        let err = topological_sort(&nodes).unwrap_err();
        match err {
            ConfigurationError::UnknownDependency { node, dependency } => {
                assert_eq!(node, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected unknown dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_rejects_duplicate_ids() {
        let nodes = vec![Node::new("a", "f"), Node::new("a", "g")];
        assert!(matches!(
            topological_sort(&nodes),
            Err(ConfigurationError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn test_node_validation() {
        assert!(Node::new("ok", "f").validate().is_ok());
        assert!(Node::new("bad", "f").with_complexity(1.5).validate().is_err());
        assert!(Node::new("self", "f").with_dependency("self").validate().is_err());
        assert!(Node::new("a/b", "f").validate().is_err());
        assert!(Node::new("__state__", "f").validate().is_err());
        assert!(Node::new("..", "f").validate().is_err());
        assert!(Node::new("", "f").validate().is_err());
    }

    #[test]
    fn test_graph_iterates_in_execution_order() {
        let graph = Graph::new(vec![
            Node::new("write", "do_write").with_dependency("research"),
            Node::new("research", "do_research"),
        ])
        .unwrap();

        let ids: Vec<&str> = graph.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["research", "write"]);
        assert_eq!(graph.len(), 2);
        assert!(graph.contains("write"));
        assert_eq!(graph.node("research").unwrap().function, "do_research");
    }
}
