//! # DagPipe
//!
//! A crash-resilient orchestrator for pipelines of provider-backed tasks.
//!
//! DagPipe runs a directed acyclic graph of nodes in dependency order and
//! checkpoints every successful output, so a run that dies halfway resumes
//! where it stopped instead of starting over. Around that core it provides:
//!
//! - **Graph definition**: nodes declared in code or YAML, validated and
//!   topologically ordered before anything runs
//! - **Checkpointing**: atomic JSON files per node, or an in-memory store
//! - **Model routing**: cheap or capable provider chosen by task complexity,
//!   with a rate budget for the capable tier and escalation on retries
//! - **Constrained generation**: a validate-and-repair loop that turns free
//!   provider text into typed values
//! - **Observability**: `tracing` logs and lifecycle events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagpipe::prelude::*;
//! use serde_json::json;
//!
//! let graph = Graph::new(vec![
//!     Node::new("research", "research"),
//!     Node::new("write", "write").with_dependency("research"),
//! ])?;
//!
//! let registry = NodeRegistry::new()
//!     .with_fn("research", |ctx, _| Ok(json!({"topic": ctx.get("topic")})))
//!     .with_fn("write", |ctx, _| Ok(json!({"draft": ctx.get("research")})));
//!
//! let mut orchestrator = PipelineOrchestrator::builder(graph, registry)
//!     .with_checkpoint_dir(".dagpipe/checkpoints")
//!     .build()?;
//!
//! let state = orchestrator
//!     .run([("topic".to_string(), json!("DagPipe"))], false)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod checkpoint;
pub mod config;
pub mod constrained;
pub mod errors;
pub mod events;
pub mod graph;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod router;
pub mod state;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        CheckpointBackend, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    };
    pub use crate::config::PipelineConfig;
    pub use crate::constrained::{
        constrained_generate, ConstrainedGenerator, Generated, OutputSchema, SchemaRegistry,
    };
    pub use crate::errors::{
        ConfigurationError, ConstrainedError, DagpipeError, ProviderError,
        RetryExhaustedError, StorageError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{Graph, GraphConfig, Node};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::orchestrator::{
        NodeStatus, OrchestratorBuilder, PipelineOrchestrator, RetryPolicy,
    };
    pub use crate::provider::{ChatMessage, FnProvider, Provider, Role, SharedProvider};
    pub use crate::registry::{NodeFunction, NodeRegistry};
    pub use crate::router::{classify_complexity, ModelRouter, Route, RouterSettings, Tier};
    pub use crate::state::{ExecutionState, NodeContext};
}
