//! Mock providers and node functions.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

use crate::errors::ProviderError;
use crate::provider::{ChatMessage, Provider, SharedProvider};
use crate::registry::NodeFunction;
use crate::state::NodeContext;

/// A provider that replays queued replies.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    last: Mutex<Option<Result<String, ProviderError>>>,
    repeat_last: bool,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    /// Creates a provider answering with `replies` in order.
    #[must_use]
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// Creates a provider replaying successes and failures in order.
    #[must_use]
    pub fn from_results(replies: impl IntoIterator<Item = Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Creates a provider that always answers `reply`.
    #[must_use]
    pub fn constant(reply: impl Into<String>) -> Self {
        Self::new([reply.into()]).repeat_last()
    }

    /// Keeps answering with the final reply once the queue is drained.
    #[must_use]
    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the transcript of every call.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        self.calls.lock().push(messages.to_vec());

        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => {
                *self.last.lock() = Some(reply.clone());
                reply
            }
            None if self.repeat_last => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err(ProviderError::other("scripted provider has no replies"))),
            None => Err(ProviderError::other("scripted provider exhausted")),
        }
    }
}

/// A node function that returns a fixed output and records its calls.
#[derive(Debug)]
pub struct CountingNode {
    output: Value,
    contexts: Mutex<Vec<NodeContext>>,
    providers: Mutex<Vec<bool>>,
}

impl CountingNode {
    /// Creates a node returning `output`.
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            output,
            contexts: Mutex::new(Vec::new()),
            providers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns the context of every call.
    #[must_use]
    pub fn contexts(&self) -> Vec<NodeContext> {
        self.contexts.lock().clone()
    }

    /// Returns whether each call received a provider.
    #[must_use]
    pub fn provider_seen(&self) -> Vec<bool> {
        self.providers.lock().clone()
    }
}

#[async_trait]
impl NodeFunction for CountingNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        provider: Option<SharedProvider>,
    ) -> anyhow::Result<Value> {
        self.contexts.lock().push(ctx.clone());
        self.providers.lock().push(provider.is_some());
        Ok(self.output.clone())
    }
}

/// A node function that fails before succeeding.
#[derive(Debug)]
pub struct FailingNode {
    failures: Option<usize>,
    message: String,
    output: Value,
    contexts: Mutex<Vec<NodeContext>>,
}

impl FailingNode {
    /// Creates a node that never succeeds.
    #[must_use]
    pub fn always(message: impl Into<String>) -> Self {
        Self {
            failures: None,
            message: message.into(),
            output: Value::Null,
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Creates a node that fails `failures` times, then returns `output`.
    #[must_use]
    pub fn times(failures: usize, message: impl Into<String>, output: Value) -> Self {
        Self {
            failures: Some(failures),
            message: message.into(),
            output,
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns the context of every call.
    #[must_use]
    pub fn contexts(&self) -> Vec<NodeContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl NodeFunction for FailingNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        _provider: Option<SharedProvider>,
    ) -> anyhow::Result<Value> {
        let call = {
            let mut contexts = self.contexts.lock();
            contexts.push(ctx.clone());
            contexts.len()
        };

        match self.failures {
            Some(failures) if call > failures => Ok(self.output.clone()),
            _ => Err(anyhow::anyhow!("{} (call {call})", self.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_provider_replays_then_exhausts() {
        let provider = ScriptedProvider::new(["one", "two"]);
        assert_eq!(provider.complete(&[]).await.unwrap(), "one");
        assert_eq!(provider.complete(&[]).await.unwrap(), "two");
        assert!(provider.complete(&[]).await.is_err());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_constant_provider_repeats() {
        let provider = ScriptedProvider::constant("same");
        for _ in 0..3 {
            let reply = provider.complete(&[ChatMessage::user("q")]).await.unwrap();
            assert_eq!(reply, "same");
        }
        assert_eq!(provider.calls()[2][0].content, "q");
    }

    #[tokio::test]
    async fn test_failing_node_recovers_after_failures() {
        let node = FailingNode::times(1, "flaky", json!({"ok": true}));
        let ctx = NodeContext::new("n");

        let err = node.execute(&ctx, None).await.unwrap_err();
        assert_eq!(err.to_string(), "flaky (call 1)");
        assert_eq!(node.execute(&ctx, None).await.unwrap(), json!({"ok": true}));
        assert_eq!(node.call_count(), 2);
    }

    #[tokio::test]
    async fn test_counting_node_records_calls() {
        let node = CountingNode::new(json!(1));
        node.execute(&NodeContext::new("n"), None).await.unwrap();
        assert_eq!(node.call_count(), 1);
        assert_eq!(node.provider_seen(), vec![false]);
    }
}
