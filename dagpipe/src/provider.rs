//! Generative provider contract.
//!
//! A provider turns a chat transcript into raw text. Dagpipe never inspects
//! which model sits behind a provider; routing and validation operate on the
//! text alone.

use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions framing the conversation.
    System,
    /// The requesting party.
    User,
    /// A previous provider reply.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        };
        write!(f, "{s}")
    }
}

/// One entry of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// An external text generator.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Produces a completion for the transcript.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

/// Shared handle to a provider, as handed to node functions.
pub type SharedProvider = Arc<dyn Provider>;

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        (**self).complete(messages).await
    }
}

/// Adapts a synchronous closure into a [`Provider`].
pub struct FnProvider<F> {
    func: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&[ChatMessage]) -> Result<String, ProviderError> + Send + Sync,
{
    /// Wraps the closure.
    #[must_use]
    pub fn new(func: F) -> Self {
        Self { func }
    }

    /// Wraps the closure and erases its type.
    #[must_use]
    pub fn shared(func: F) -> SharedProvider
    where
        F: 'static,
    {
        Arc::new(Self::new(func))
    }
}

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Provider for FnProvider<F>
where
    F: Fn(&[ChatMessage]) -> Result<String, ProviderError> + Send + Sync,
{
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        (self.func)(messages)
    }
}
