//! Sequential, resumable execution of a node graph.
//!
//! A run walks the graph in topological order. Nodes with a checkpoint are
//! restored instead of executed; every other node gets a context built from
//! the injected state and its direct dependencies, is routed to a provider,
//! and is retried with escalation until it succeeds or its attempts run out.
//! Each success is checkpointed before the next node starts, so a failed run
//! can be resumed by running again against the same store.

mod retry;
mod status;

pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use status::NodeStatus;

use crate::checkpoint::{CheckpointBackend, CheckpointStore, FileCheckpointStore};
use crate::config::PipelineConfig;
use crate::constrained::SchemaRegistry;
use crate::errors::{ConfigurationError, DagpipeError, RetryExhaustedError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::graph::{Graph, Node};
use crate::provider::SharedProvider;
use crate::registry::{NodeFunction, NodeRegistry};
use crate::router::ModelRouter;
use crate::state::{is_reserved_key, ExecutionState, NodeContext};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Called after a node succeeds with its id, output and the time spent on it
/// across all attempts.
pub type CompletionCallback = Arc<dyn Fn(&str, &Value, Duration) + Send + Sync>;

/// Builder for [`PipelineOrchestrator`].
pub struct OrchestratorBuilder {
    graph: Graph,
    registry: NodeRegistry,
    router: Option<Arc<ModelRouter<SharedProvider>>>,
    store: Option<Arc<dyn CheckpointStore>>,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
    schemas: Option<SchemaRegistry>,
    on_node_complete: Option<CompletionCallback>,
}

impl OrchestratorBuilder {
    /// Routes provider-backed nodes through `router`.
    #[must_use]
    pub fn with_router(self, router: ModelRouter<SharedProvider>) -> Self {
        self.with_shared_router(Arc::new(router))
    }

    /// Routes through a router shared with other orchestrators.
    ///
    /// The rate budget is then shared as well.
    #[must_use]
    pub fn with_shared_router(mut self, router: Arc<ModelRouter<SharedProvider>>) -> Self {
        self.router = Some(router);
        self
    }

    /// Sets the checkpoint store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Stores checkpoints as JSON files under `dir`.
    #[must_use]
    pub fn with_checkpoint_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.with_store(Arc::new(FileCheckpointStore::new(dir)))
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the attempts per node, including the first.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.retry.max_attempts = max_retries;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Validates node outputs against their `output_schema` labels.
    ///
    /// Every label used by the graph must be registered.
    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Registers a completion callback.
    #[must_use]
    pub fn on_node_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Value, Duration) + Send + Sync + 'static,
    {
        self.on_node_complete = Some(Arc::new(callback));
        self
    }

    /// Applies the checkpoint backend and retry policy of a configuration.
    #[must_use]
    pub fn with_config(self, config: &PipelineConfig) -> Self {
        self.with_store(config.checkpoint.build())
            .with_retry_policy(config.retry.clone())
    }

    /// Resolves node functions and schema labels.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownFunction`],
    /// [`ConfigurationError::UnknownSchema`] or an invalid retry setting.
    pub fn build(self) -> Result<PipelineOrchestrator, ConfigurationError> {
        self.retry.validate()?;

        let mut functions = HashMap::with_capacity(self.graph.len());
        for node in self.graph.iter() {
            functions.insert(node.id.clone(), self.registry.resolve(node)?);
        }

        if let Some(schemas) = &self.schemas {
            for node in self.graph.iter() {
                if let Some(label) = &node.output_schema {
                    if !schemas.contains(label) {
                        return Err(ConfigurationError::UnknownSchema {
                            node: node.id.clone(),
                            schema: label.clone(),
                        });
                    }
                }
            }
        }

        let store = self
            .store
            .unwrap_or_else(|| CheckpointBackend::default().build());
        let statuses = self
            .graph
            .execution_order()
            .iter()
            .map(|id| (id.clone(), NodeStatus::Pending))
            .collect();

        tracing::debug!(
            nodes = self.graph.len(),
            routed = self.router.is_some(),
            max_attempts = self.retry.max_attempts,
            "Orchestrator built"
        );

        Ok(PipelineOrchestrator {
            graph: self.graph,
            functions,
            router: self.router,
            store,
            retry: self.retry,
            events: self.events,
            schemas: self.schemas,
            on_node_complete: self.on_node_complete,
            statuses,
            run_id: None,
        })
    }
}

/// Executes a [`Graph`] with checkpointing, routing and retry.
pub struct PipelineOrchestrator {
    graph: Graph,
    functions: HashMap<String, Arc<dyn NodeFunction>>,
    router: Option<Arc<ModelRouter<SharedProvider>>>,
    store: Arc<dyn CheckpointStore>,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
    schemas: Option<SchemaRegistry>,
    on_node_complete: Option<CompletionCallback>,
    statuses: BTreeMap<String, NodeStatus>,
    run_id: Option<Uuid>,
}

impl PipelineOrchestrator {
    /// Starts building an orchestrator for `graph` resolving functions from
    /// `registry`.
    ///
    /// Without further configuration checkpoints go to
    /// `.dagpipe/checkpoints`, nodes get no provider, and each node is tried
    /// three times.
    #[must_use]
    pub fn builder(graph: Graph, registry: NodeRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            graph,
            registry,
            router: None,
            store: None,
            retry: RetryPolicy::default(),
            events: Arc::new(NoOpEventSink),
            schemas: None,
            on_node_complete: None,
        }
    }

    /// The graph being executed.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The checkpoint store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// The retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Status of every node as of the latest run.
    #[must_use]
    pub fn statuses(&self) -> &BTreeMap<String, NodeStatus> {
        &self.statuses
    }

    /// Status of one node.
    #[must_use]
    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.statuses.get(node_id).copied()
    }

    /// Id of the latest run.
    #[must_use]
    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    /// Runs the pipeline.
    ///
    /// `initial_state` values are visible to every node. With `fresh` all
    /// checkpoints are cleared first; otherwise nodes with a checkpoint are
    /// restored and skipped.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::StateKeyCollision`] if an injected key shadows
    ///   a node id or a reserved key.
    /// - [`DagpipeError::Storage`] if checkpoints cannot be cleared or saved.
    /// - [`DagpipeError::RetryExhausted`] naming the first node that failed on
    ///   every attempt. Checkpoints written before the failure are kept.
    pub async fn run(
        &mut self,
        initial_state: impl IntoIterator<Item = (String, Value)>,
        fresh: bool,
    ) -> Result<ExecutionState, DagpipeError> {
        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        for status in self.statuses.values_mut() {
            *status = NodeStatus::Pending;
        }

        let started = Instant::now();
        let result = self.run_inner(initial_state, fresh).await;
        let duration_ms = elapsed_ms(started);

        match &result {
            Ok(state) => {
                tracing::info!(
                    %run_id,
                    nodes = self.graph.len(),
                    duration_ms,
                    "Pipeline completed"
                );
                self.emit(
                    events::PIPELINE_COMPLETED,
                    json!({"nodes": state.outputs().len(), "duration_ms": duration_ms}),
                )
                .await;
            }
            Err(e) => {
                tracing::error!(%run_id, code = e.code(), error = %e, "Pipeline failed");
                let mut data = e.to_json();
                data["duration_ms"] = json!(duration_ms);
                self.emit(events::PIPELINE_FAILED, data).await;
            }
        }
        result
    }

    async fn run_inner(
        &mut self,
        initial_state: impl IntoIterator<Item = (String, Value)>,
        fresh: bool,
    ) -> Result<ExecutionState, DagpipeError> {
        let mut state = ExecutionState::new(initial_state);
        self.check_injected_keys(&state)?;

        self.emit(
            events::PIPELINE_STARTED,
            json!({
                "nodes": self.graph.execution_order(),
                "fresh": fresh,
                "injected": state.injected().keys().collect::<Vec<_>>(),
            }),
        )
        .await;

        if fresh {
            self.store.clear().await?;
            tracing::info!("Cleared checkpoints for fresh run");
        }

        let order = self.graph.execution_order().to_vec();
        for id in &order {
            if let Some(output) = self.store.load(id).await {
                tracing::info!(node = %id, "Restored node from checkpoint");
                state.record(id, output);
                self.set_status(id, NodeStatus::Success);
                self.emit(events::NODE_RESTORED, json!({"node": id})).await;
            }
        }

        for id in &order {
            if state.output(id).is_some() {
                continue;
            }
            let Some(node) = self.graph.node(id).cloned() else {
                continue;
            };
            self.execute_node(&node, &mut state).await?;
        }

        Ok(state)
    }

    async fn execute_node(
        &mut self,
        node: &Node,
        state: &mut ExecutionState,
    ) -> Result<(), DagpipeError> {
        let Some(function) = self.functions.get(&node.id).cloned() else {
            return Err(ConfigurationError::UnknownFunction {
                node: node.id.clone(),
                function: node.function.clone(),
            }
            .into());
        };

        let max_attempts = self.retry.max_attempts;
        let started = Instant::now();
        let mut last_error: Option<String> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                if !delay.is_zero() {
                    tracing::debug!(
                        node = %node.id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Pausing before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            self.set_status(&node.id, NodeStatus::Running);
            let ctx = NodeContext::for_node(
                &node.id,
                state,
                &node.depends_on,
                attempt,
                last_error.as_deref(),
            );
            let (provider, label) = self.select_provider(node, attempt, last_error.as_deref());

            tracing::debug!(
                node = %node.id,
                attempt,
                provider = label.as_deref().unwrap_or("none"),
                "Executing node"
            );
            self.emit(
                events::NODE_STARTED,
                json!({"node": node.id, "attempt": attempt, "provider": label}),
            )
            .await;

            let outcome = match function.execute(&ctx, provider).await {
                Ok(output) => self.check_output(node, &output).map(|()| output),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(output) => {
                    if let Err(e) = self.store.save(&node.id, &output).await {
                        self.set_status(&node.id, NodeStatus::Failed);
                        tracing::error!(
                            node = %node.id,
                            attempt,
                            error = %e,
                            "Checkpoint save failed"
                        );
                        self.emit(
                            events::NODE_ATTEMPT_FAILED,
                            json!({
                                "node": node.id,
                                "attempt": attempt,
                                "error": e.to_string(),
                                "fatal": true,
                            }),
                        )
                        .await;
                        return Err(e.into());
                    }
                    let elapsed = started.elapsed();
                    let duration_ms = elapsed_ms(started);

                    self.set_status(&node.id, NodeStatus::Success);
                    tracing::info!(
                        node = %node.id,
                        attempt,
                        provider = label.as_deref().unwrap_or("none"),
                        duration_ms,
                        "Node completed"
                    );
                    self.emit(
                        events::NODE_COMPLETED,
                        json!({
                            "node": node.id,
                            "attempt": attempt,
                            "provider": label,
                            "duration_ms": duration_ms,
                        }),
                    )
                    .await;

                    if let Some(callback) = &self.on_node_complete {
                        callback(&node.id, &output, elapsed);
                    }
                    state.record(&node.id, output);
                    return Ok(());
                }
                Err(e) => {
                    let text = format!("{e:#}");
                    self.set_status(&node.id, NodeStatus::Failed);
                    tracing::warn!(
                        node = %node.id,
                        attempt,
                        max_attempts,
                        error = %text,
                        "Node attempt failed"
                    );
                    self.emit(
                        events::NODE_ATTEMPT_FAILED,
                        json!({"node": node.id, "attempt": attempt, "error": text}),
                    )
                    .await;
                    last_error = Some(text);
                }
            }
        }

        Err(
            RetryExhaustedError::new(&node.id, max_attempts, last_error.unwrap_or_default())
                .into(),
        )
    }

    fn select_provider(
        &self,
        node: &Node,
        attempt: usize,
        last_error: Option<&str>,
    ) -> (Option<SharedProvider>, Option<String>) {
        if node.is_deterministic {
            return (None, None);
        }
        let Some(router) = &self.router else {
            return (None, None);
        };

        let route = if attempt == 0 {
            router.route(node.complexity)
        } else {
            router.route_for_retry(
                node.complexity,
                attempt,
                last_error.unwrap_or_default(),
            )
        };
        (Some(route.provider), Some(route.label))
    }

    fn check_output(&self, node: &Node, output: &Value) -> anyhow::Result<()> {
        match (&self.schemas, &node.output_schema) {
            (Some(schemas), Some(label)) => {
                schemas.validate(label, output).map_err(anyhow::Error::msg)
            }
            _ => Ok(()),
        }
    }

    fn check_injected_keys(&self, state: &ExecutionState) -> Result<(), ConfigurationError> {
        for key in state.injected().keys() {
            if self.graph.contains(key) {
                return Err(ConfigurationError::StateKeyCollision {
                    key: key.clone(),
                    reason: "a node id".to_string(),
                });
            }
            if is_reserved_key(key) {
                return Err(ConfigurationError::StateKeyCollision {
                    key: key.clone(),
                    reason: "a reserved key".to_string(),
                });
            }
        }
        Ok(())
    }

    fn set_status(&mut self, node_id: &str, status: NodeStatus) {
        if let Some(slot) = self.statuses.get_mut(node_id) {
            *slot = status;
        }
    }

    async fn emit(&self, event_type: &str, mut data: Value) {
        if let Value::Object(map) = &mut data {
            if let Some(run_id) = self.run_id {
                map.insert("run_id".to_string(), json!(run_id.to_string()));
            }
            map.insert(
                "timestamp".to_string(),
                json!(chrono::Utc::now().to_rfc3339()),
            );
        }
        self.events.emit(event_type, Some(data)).await;
    }
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("order", &self.graph.execution_order())
            .field("store", &self.store)
            .field("retry", &self.retry)
            .field("routed", &self.router.is_some())
            .field("schemas", &self.schemas)
            .field("statuses", &self.statuses)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
