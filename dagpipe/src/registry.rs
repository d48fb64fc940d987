//! Node functions and the name registry that resolves them.

use crate::errors::ConfigurationError;
use crate::graph::Node;
use crate::provider::SharedProvider;
use crate::state::NodeContext;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A unit of work bound to one or more graph nodes.
///
/// Implementations read only their [`NodeContext`]. The provider is `None`
/// for deterministic nodes and when the orchestrator has no router.
#[async_trait]
pub trait NodeFunction: Send + Sync {
    /// Runs the node.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failed attempt. Its `{:#}` text is shown to
    /// the next attempt through [`NodeContext::last_error`].
    async fn execute(
        &self,
        ctx: &NodeContext,
        provider: Option<SharedProvider>,
    ) -> anyhow::Result<Value>;
}

/// Adapts a synchronous closure into a [`NodeFunction`].
pub struct FnNode<F> {
    func: F,
}

impl<F> FnNode<F>
where
    F: Fn(&NodeContext, Option<SharedProvider>) -> anyhow::Result<Value> + Send + Sync,
{
    /// Wraps the closure.
    #[must_use]
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> NodeFunction for FnNode<F>
where
    F: Fn(&NodeContext, Option<SharedProvider>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn execute(
        &self,
        ctx: &NodeContext,
        provider: Option<SharedProvider>,
    ) -> anyhow::Result<Value> {
        (self.func)(ctx, provider)
    }
}

/// Adapts a closure returning a future into a [`NodeFunction`].
///
/// The closure receives an owned copy of the context so the future can be
/// `'static`.
pub struct AsyncFnNode<F> {
    func: F,
}

impl<F, Fut> AsyncFnNode<F>
where
    F: Fn(NodeContext, Option<SharedProvider>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    /// Wraps the closure.
    #[must_use]
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> NodeFunction for AsyncFnNode<F>
where
    F: Fn(NodeContext, Option<SharedProvider>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(
        &self,
        ctx: &NodeContext,
        provider: Option<SharedProvider>,
    ) -> anyhow::Result<Value> {
        (self.func)(ctx.clone(), provider).await
    }
}

/// Resolves the `fn` names of graph nodes to callables.
///
/// Populated once at startup. Lookups happen when an orchestrator is built,
/// so an unknown name fails before any node runs.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    functions: HashMap<String, Arc<dyn NodeFunction>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node function under `name`, replacing any previous one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn NodeFunction>,
    ) -> &mut Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Registers a synchronous closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&NodeContext, Option<SharedProvider>) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(FnNode::new(func)))
    }

    /// Registers an async closure.
    pub fn register_async<F, Fut>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(NodeContext, Option<SharedProvider>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, Arc::new(AsyncFnNode::new(func)))
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, function: Arc<dyn NodeFunction>) -> Self {
        self.register(name, function);
        self
    }

    /// Builder form of [`register_fn`](Self::register_fn).
    #[must_use]
    pub fn with_fn<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&NodeContext, Option<SharedProvider>) -> anyhow::Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.register_fn(name, func);
        self
    }

    /// Returns the function registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeFunction>> {
        self.functions.get(name).cloned()
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Returns the registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves the function of a node.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownFunction`] if the name is not
    /// registered.
    pub fn resolve(&self, node: &Node) -> Result<Arc<dyn NodeFunction>, ConfigurationError> {
        self.get(&node.function)
            .ok_or_else(|| ConfigurationError::UnknownFunction {
                node: node.id.clone(),
                function: node.function.clone(),
            })
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
